// termpal: SSH 终端客户端核心库
//
// - ssh: 连接状态机、Shell / 命令通道、会话管理器
// - crypto: 本地加密
// - models: 数据模型
// - services: 存储、连接配置、密钥、设置、known hosts

pub mod crypto;
pub mod models;
pub mod services;
pub mod ssh;

pub use crypto::{CryptoError, EncryptionHelper};
pub use ssh::{SessionManager, SessionState, SshError};
