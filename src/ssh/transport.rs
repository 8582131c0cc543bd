// 传输层抽象
//
// TransportConnection 只负责状态机，具体的网络 / 协议实现通过 Transport 注入：
// 生产环境使用 russh（RusshTransport），测试使用内存实现。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::config::SshConfig;
use super::connection::TransportLink;
use super::credential::ResolvedCredential;
use super::error::SshError;
use super::session::{CommandOutput, PtyRequest};
use super::shell::ShellChannel;

/// 建立连接的工厂
#[async_trait]
pub trait Transport: Send + Sync {
    /// 建立 TCP 连接、完成握手并认证
    ///
    /// 握手完成后调用 `link.advance(TransportState::Authenticating)`；
    /// 连接建立后发生的意外断开通过 `link.lost(..)` 上报。
    /// `credential` 在认证结束后随函数返回一并 drop。
    async fn connect(
        &self,
        target: &SshConfig,
        credential: ResolvedCredential,
        link: TransportLink,
    ) -> Result<Arc<dyn TransportSession>, SshError>;
}

/// 已认证的会话句柄
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// 打开带 PTY 的交互式 Shell
    ///
    /// `cancel` 触发时 Shell 泵任务退出并关闭通道。
    async fn open_shell(
        &self,
        pty: &PtyRequest,
        cancel: CancellationToken,
    ) -> Result<ShellChannel, SshError>;

    /// 在独立通道上执行一条命令并收集输出
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// 发送一次心跳探测
    async fn keepalive(&self) -> Result<(), SshError>;

    /// 断开连接
    async fn close(&self) -> Result<(), SshError>;

    /// 底层连接是否已经结束（断线上报之前也可能为 true）
    fn is_closed(&self) -> bool {
        false
    }
}
