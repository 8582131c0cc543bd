// SSH 连接状态与事件定义

/// 传输层连接状态
///
/// `Idle → Connecting → Authenticating → Ready → Closing → Closed`，
/// 握手、认证或运行中的失败进入终止状态 `Error`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// 尚未发起连接
    Idle,
    /// TCP 连接 / SSH 握手中
    Connecting,
    /// 握手完成，身份认证中
    Authenticating,
    /// 可以打开通道
    Ready,
    /// 主动关闭中
    Closing,
    /// 已关闭
    Closed,
    /// 失败或意外断开
    Error,
}

impl TransportState {
    /// 状态机是否允许从当前状态迁移到 `next`
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Authenticating, Ready) => true,
            (Connecting | Authenticating | Ready, Error) => true,
            // 任意非终止状态都可以主动关闭
            (Idle | Connecting | Authenticating | Ready, Closing) => true,
            (Closing, Closed) => true,
            // 关闭过程中底层断开
            (Closing, Error) => true,
            _ => false,
        }
    }

    /// 终止状态（不会再变化）
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Ready => "Ready",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 传输层事件（异步通知给 SessionManager）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// 状态变化
    StateChanged(TransportState),
    /// 连接意外断开
    Lost { reason: String },
}
