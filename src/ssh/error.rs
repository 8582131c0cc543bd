// SSH 错误类型定义

use thiserror::Error;

/// SSH 会话层错误
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 连接配置不存在
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// 连接配置缺少认证信息
    #[error("Profile has incomplete credentials: {0}")]
    ProfileIncomplete(String),

    /// 引用的密钥不存在
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// 密钥无法解析
    #[error("Key error: {0}")]
    Key(String),

    /// TCP 连接超时
    #[error("Connection timeout after {0}s")]
    ConnectTimeout(u64),

    /// 主机密钥校验失败
    #[error("Host key rejected for {host}: {fingerprint}")]
    HostKeyRejected { host: String, fingerprint: String },

    /// 认证失败
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 未连接
    #[error("SSH connection is not established")]
    NotConnected,

    /// 没有活动的 Shell
    #[error("Shell session is not active")]
    ShellNotActive,

    /// Shell 通道未打开
    #[error("Channel is not active")]
    ChannelNotActive,

    /// 通道请求失败
    #[error("Channel error: {0}")]
    Channel(String),

    /// 没有可用于重连的配置
    #[error("No previous profile to reconnect")]
    NoPreviousProfile,

    /// 已有连接正在进行
    #[error("A connection attempt is already in progress")]
    ConnectInProgress,

    /// 连接已取消
    #[error("Connection cancelled")]
    Cancelled,

    /// 外部存储错误（配置 / 密钥存储）
    #[error("Storage error: {0}")]
    Storage(String),

    /// 传输层错误（网络断开、协议错误等）
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SshError {
    /// 自动重连时是否值得重试
    ///
    /// 主机密钥与认证失败需要用户介入，配置类错误重试也不会改变结果。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SshError::HostKeyRejected { .. }
                | SshError::AuthenticationFailed(_)
                | SshError::ProfileNotFound(_)
                | SshError::ProfileIncomplete(_)
                | SshError::KeyNotFound(_)
                | SshError::Key(_)
                | SshError::Config(_)
                | SshError::Cancelled
        )
    }
}

impl From<std::io::Error> for SshError {
    fn from(e: std::io::Error) -> Self {
        SshError::Transport(e.to_string())
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Transport(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}
