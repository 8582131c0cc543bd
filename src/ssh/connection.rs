// 传输层连接
//
// 持有单个远程主机的连接状态机与已认证的会话句柄。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SshConfig;
use super::credential::ResolvedCredential;
use super::error::SshError;
use super::event::{TransportEvent, TransportState};
use super::transport::{Transport, TransportSession};

struct Shared {
    address: String,
    state: Mutex<TransportState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn advance(&self, next: TransportState) -> bool {
        {
            let mut state = self.state.lock();
            if !state.can_transition_to(next) {
                return false;
            }
            debug!("[SSH] {} {} -> {}", self.address, *state, next);
            *state = next;
        }
        let _ = self.events.send(TransportEvent::StateChanged(next));
        true
    }
}

/// 交给传输实现的回调句柄
///
/// 用于上报握手进度和连接建立后的意外断开。
#[derive(Clone)]
pub struct TransportLink {
    shared: Arc<Shared>,
}

impl TransportLink {
    /// 推进状态，非法迁移时返回 false
    pub fn advance(&self, next: TransportState) -> bool {
        self.shared.advance(next)
    }

    /// 上报连接意外断开
    ///
    /// 主动关闭过程中或已终止的连接会忽略该通知。
    pub fn lost(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let state = *self.shared.state.lock();
            if state == TransportState::Closing || state.is_terminal() {
                return;
            }
        }
        if self.shared.advance(TransportState::Error) {
            warn!("[SSH] Connection to {} lost: {}", self.shared.address, reason);
            let _ = self.shared.events.send(TransportEvent::Lost { reason });
        }
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state.lock()
    }
}

/// 到单个主机的传输层连接
pub struct TransportConnection {
    target: SshConfig,
    link: TransportLink,
    session: Mutex<Option<Arc<dyn TransportSession>>>,
    /// 所有通道（Shell 泵任务）的取消范围
    channels: CancellationToken,
}

impl TransportConnection {
    /// 创建连接（Idle），同时返回事件接收器
    pub fn new(target: SshConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            address: target.address(),
            state: Mutex::new(TransportState::Idle),
            events,
        });
        let conn = Self {
            target,
            link: TransportLink { shared },
            session: Mutex::new(None),
            channels: CancellationToken::new(),
        };
        (conn, rx)
    }

    pub fn target(&self) -> &SshConfig {
        &self.target
    }

    pub fn state(&self) -> TransportState {
        self.link.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == TransportState::Ready
    }

    /// Ready 且底层会话仍然存活
    pub fn is_alive(&self) -> bool {
        self.is_ready()
            && self
                .session
                .lock()
                .as_ref()
                .is_some_and(|session| !session.is_closed())
    }

    /// 建立连接并认证
    ///
    /// 成功后进入 Ready；失败进入 Error 并返回底层错误。
    pub async fn open(
        &self,
        transport: &dyn Transport,
        credential: ResolvedCredential,
    ) -> Result<(), SshError> {
        if !self.link.advance(TransportState::Connecting) {
            return Err(SshError::Transport(format!(
                "Cannot open connection in state {}",
                self.state()
            )));
        }

        info!(
            "[SSH] Connecting to {}@{}",
            self.target.username,
            self.target.address()
        );

        let session = match transport
            .connect(&self.target, credential, self.link.clone())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.link.advance(TransportState::Error);
                return Err(e);
            }
        };

        // 传输实现可能不单独上报认证阶段
        if self.state() == TransportState::Connecting {
            self.link.advance(TransportState::Authenticating);
        }

        *self.session.lock() = Some(session.clone());
        if self.link.advance(TransportState::Ready) {
            info!("[SSH] Connection to {} established", self.target.address());
            return Ok(());
        }

        // 握手期间被关闭或已断开
        self.session.lock().take();
        let _ = session.close().await;
        match self.state() {
            TransportState::Closing | TransportState::Closed => Err(SshError::Cancelled),
            state => Err(SshError::Transport(format!(
                "Connection lost during handshake ({})",
                state
            ))),
        }
    }

    /// 获取已认证的会话，非 Ready 状态返回 `NotConnected`
    pub fn session(&self) -> Result<Arc<dyn TransportSession>, SshError> {
        if !self.is_ready() {
            return Err(SshError::NotConnected);
        }
        self.session.lock().clone().ok_or(SshError::NotConnected)
    }

    /// 新通道使用的取消令牌，连接关闭时统一取消
    pub fn channel_scope(&self) -> CancellationToken {
        self.channels.child_token()
    }

    /// 发送心跳
    pub async fn keepalive(&self) -> Result<(), SshError> {
        self.session()?.keepalive().await
    }

    /// 关闭连接
    ///
    /// 先取消所有通道，再断开会话。重复调用无副作用。
    pub async fn close(&self) -> Result<(), SshError> {
        let state = self.state();
        if state == TransportState::Closed {
            return Ok(());
        }

        self.channels.cancel();
        let session = self.session.lock().take();
        if !state.is_terminal() {
            self.link.advance(TransportState::Closing);
        }

        let result = match session {
            Some(session) => session.close().await,
            None => Ok(()),
        };

        if self.state() == TransportState::Closing {
            self.link.advance(TransportState::Closed);
            debug!("[SSH] Connection to {} closed", self.target.address());
        }
        result
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        self.channels.cancel();
    }
}
