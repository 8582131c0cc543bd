// SSH 连接模块
//
// 模块结构:
// - config: 连接与会话策略配置 (SshConfig, SessionConfig)
// - error: 错误类型 (SshError)
// - credential: 凭据解析 (CredentialResolver) 与外部存储接口
// - event: 传输层状态机与事件 (TransportState, TransportEvent)
// - transport: 传输层抽象 (Transport, TransportSession)
// - connection: 传输层连接 (TransportConnection)
// - handler / client / session: 基于 russh 的传输实现
// - shell: 交互式 Shell 通道 (ShellChannel)
// - command: 命令执行通道 (CommandChannel)
// - reconnect: 指数退避重连
// - manager: 会话管理器 (SessionManager)

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod reconnect;
pub mod session;
pub mod shell;
pub mod transport;

// 公开导出
pub use client::RusshTransport;
pub use command::CommandChannel;
pub use config::{HostKeyPolicy, ReconnectConfig, SessionConfig, ShellOptions, SshConfig};
pub use connection::{TransportConnection, TransportLink};
pub use credential::{
    CredentialKind, CredentialResolver, KeyMaterial, KeyProvider, ProfileProvider,
    ResolvedCredential,
};
pub use error::SshError;
pub use event::{TransportEvent, TransportState};
pub use handler::{HostKeyDecision, HostKeyVerifier};
pub use manager::{SessionManager, SessionState};
pub use reconnect::Backoff;
pub use session::{CommandOutput, PtyRequest};
pub use shell::{ShellChannel, ShellInput, ShellPeer, ShellReader};
pub use transport::{Transport, TransportSession};
