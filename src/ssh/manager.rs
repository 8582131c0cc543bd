// SSH 会话管理器
//
// 串联 CredentialResolver → TransportConnection → ShellChannel / CommandChannel，
// 负责心跳、意外断开后的自动重连，以及对外的状态 / 数据订阅。
//
// 所有状态变更都在同一把锁内完成并按顺序推送给订阅者；
// 每次 connect / disconnect / 断线都会推进 epoch，过期的异步结果直接丢弃。

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::CommandChannel;
use super::config::{SessionConfig, ShellOptions, SshConfig};
use super::connection::TransportConnection;
use super::credential::{CredentialResolver, KeyProvider, ProfileProvider};
use super::error::SshError;
use super::event::TransportEvent;
use super::reconnect::{self, Backoff, ReconnectOutcome};
use super::session::CommandOutput;
use super::shell::{ShellChannel, ShellReader};
use super::transport::Transport;

/// 默认 Shell 参数
pub const DEFAULT_ROWS: u32 = 24;
pub const DEFAULT_COLS: u32 = 80;
pub const DEFAULT_TERM: &str = "xterm-256color";

/// 对外暴露的会话状态
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub connected: bool,
    pub connecting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

/// 旧连接的资源，在锁外关闭
type Resources = (Option<Arc<ShellChannel>>, Option<Arc<TransportConnection>>);

struct Shared {
    session: SessionState,
    epoch: u64,
    last_profile_id: Option<String>,
    connection: Option<Arc<TransportConnection>>,
    shell: Option<Arc<ShellChannel>>,
    connect_cancel: Option<CancellationToken>,
    /// 当前连接的后台任务（心跳、断线监听、输出转发）
    tasks: Vec<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    /// 最近一次打开的 Shell 参数，自动重连后据此恢复 Shell
    shell_request: Option<ShellOptions>,
    state_subs: Vec<mpsc::UnboundedSender<SessionState>>,
    connection_subs: Vec<mpsc::UnboundedSender<bool>>,
    data_subs: Vec<mpsc::Sender<Vec<u8>>>,
}

impl Shared {
    fn publish(&mut self, next: SessionState) {
        if next == self.session {
            return;
        }
        let connected_changed = next.connected != self.session.connected;
        debug!(
            "[Session] State: connected={} connecting={} error={:?}",
            next.connected, next.connecting, next.error
        );
        self.session = next;

        let snapshot = self.session.clone();
        self.state_subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
        if connected_changed {
            let connected = self.session.connected;
            self.connection_subs.retain(|tx| tx.send(connected).is_ok());
        }
    }

    fn reflect_error(&mut self, error: &SshError) {
        let next = SessionState {
            error: Some(error.to_string()),
            ..self.session.clone()
        };
        self.publish(next);
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn take_resources(&mut self) -> Resources {
        self.abort_tasks();
        (self.shell.take(), self.connection.take())
    }
}

struct Inner {
    config: SessionConfig,
    profiles: Arc<dyn ProfileProvider>,
    resolver: CredentialResolver,
    transport: Arc<dyn Transport>,
    commands: CommandChannel,
    shared: Mutex<Shared>,
}

/// SSH 会话管理器
///
/// 显式创建、按句柄共享（`Clone` 只复制句柄）。同一时间最多持有一个连接和一个 Shell。
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        profiles: Arc<dyn ProfileProvider>,
        keys: Arc<dyn KeyProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let commands = CommandChannel::new(config.max_concurrent_commands);
        Self {
            inner: Arc::new(Inner {
                config,
                profiles,
                resolver: CredentialResolver::new(keys),
                transport,
                commands,
                shared: Mutex::new(Shared {
                    session: SessionState::default(),
                    epoch: 0,
                    last_profile_id: None,
                    connection: None,
                    shell: None,
                    connect_cancel: None,
                    tasks: Vec::new(),
                    reconnect_task: None,
                    shell_request: None,
                    state_subs: Vec::new(),
                    connection_subs: Vec::new(),
                    data_subs: Vec::new(),
                }),
            }),
        }
    }

    /// 连接到指定配置
    ///
    /// 调用返回前 `connecting` 已经置为 true；返回的 future 在连接成功或失败时完成。
    /// 已有连接进行中时返回 `ConnectInProgress`。
    /// 丢弃返回的 future 等同于取消这次连接。
    pub fn connect(
        &self,
        profile_id: &str,
    ) -> impl Future<Output = Result<(), SshError>> + Send + 'static {
        self.inner.start_connect(profile_id.to_string(), false)
    }

    /// 断开连接
    ///
    /// 停止心跳、取消待执行的重连和进行中的连接，先关闭 Shell 再关闭连接。可重复调用。
    pub fn disconnect(&self) -> impl Future<Output = ()> + Send + 'static {
        let old = {
            let mut shared = self.inner.shared.lock();
            if let Some(task) = shared.reconnect_task.take() {
                task.abort();
            }
            if let Some(cancel) = shared.connect_cancel.take() {
                cancel.cancel();
            }
            shared.epoch += 1;
            shared.shell_request = None;
            let old = shared.take_resources();
            shared.publish(SessionState::default());
            old
        };
        async move {
            if old.0.is_some() || old.1.is_some() {
                info!("[Session] Disconnecting");
            }
            teardown(old).await;
        }
    }

    /// 断开后用上一次的配置重新连接，凭据重新解析
    pub async fn reconnect(&self) -> Result<(), SshError> {
        let profile_id = self
            .inner
            .shared
            .lock()
            .last_profile_id
            .clone()
            .ok_or(SshError::NoPreviousProfile)?;
        info!("[Session] Reconnecting to profile {}", profile_id);
        self.disconnect().await;
        self.connect(&profile_id).await
    }

    /// 打开交互式 Shell，未指定的参数使用 24x80 / xterm-256color
    ///
    /// 连接意外断开并自动重连成功后，会用相同的参数重新打开 Shell。
    pub async fn open_shell(&self, options: Option<ShellOptions>) -> Result<(), SshError> {
        self.inner.open_shell(options).await
    }

    /// 向 Shell 写入数据，不修改会话状态
    pub async fn send_data(&self, data: &[u8]) -> Result<(), SshError> {
        let shell = self
            .inner
            .shared
            .lock()
            .shell
            .clone()
            .filter(|shell| shell.is_open())
            .ok_or(SshError::ShellNotActive)?;
        shell
            .write(data)
            .await
            .map_err(|_| SshError::ShellNotActive)
    }

    /// 执行一条非交互式命令
    pub async fn execute_command(&self, command: &str) -> Result<CommandOutput, SshError> {
        let (conn, epoch) = self.inner.connected()?;
        match self.inner.commands.execute(&conn, command).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("[Session] Command failed: {}", e);
                self.inner.reflect_error(epoch, &e);
                Err(e)
            }
        }
    }

    /// 调整 Shell 尺寸，没有 Shell 时忽略
    pub async fn resize(&self, rows: u32, cols: u32) {
        let shell = {
            let mut shared = self.inner.shared.lock();
            if let Some(request) = shared.shell_request.as_mut() {
                request.rows = Some(rows);
                request.cols = Some(cols);
            }
            shared.shell.clone()
        };
        if let Some(shell) = shell {
            shell.resize(rows, cols).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().session.connected
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().session.clone()
    }

    /// 最近一次连接（成功或尝试）使用的配置
    pub fn last_profile_id(&self) -> Option<String> {
        self.inner.shared.lock().last_profile_id.clone()
    }

    /// 自动重连是否仍在进行
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .shared
            .lock()
            .reconnect_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn has_shell(&self) -> bool {
        self.inner
            .shared
            .lock()
            .shell
            .as_ref()
            .is_some_and(|shell| shell.is_open())
    }

    /// 订阅状态变化，订阅时先收到当前状态
    pub fn subscribe_state(&self) -> mpsc::UnboundedReceiver<SessionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.inner.shared.lock();
        let _ = tx.send(shared.session.clone());
        shared.state_subs.push(tx);
        rx
    }

    /// 订阅连接状态（只推送变化），订阅时先收到当前值
    pub fn subscribe_connection(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.inner.shared.lock();
        let _ = tx.send(shared.session.connected);
        shared.connection_subs.push(tx);
        rx
    }

    /// 订阅 Shell 输出
    ///
    /// 每个订阅者有独立的有界缓冲，读取过慢时会减缓远端输出的读取。
    pub fn subscribe_data(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(self.inner.config.data_buffer.max(1));
        self.inner.shared.lock().data_subs.push(tx);
        rx
    }
}

impl Inner {
    /// 开始一次连接；在返回前同步置为 connecting
    fn start_connect(
        self: &Arc<Self>,
        profile_id: String,
        from_reconnect: bool,
    ) -> impl Future<Output = Result<(), SshError>> + Send + 'static {
        let inner = self.clone();
        let begun = self.begin_connect(&profile_id, from_reconnect);
        let guard = begun.as_ref().ok().map(|(epoch, _, _)| ConnectGuard {
            inner: Arc::downgrade(self),
            epoch: *epoch,
        });
        async move {
            let _guard = guard;
            let (epoch, cancel, old) = begun?;
            inner.run_connect(epoch, cancel, profile_id, old).await
        }
    }

    async fn open_shell(self: &Arc<Self>, options: Option<ShellOptions>) -> Result<(), SshError> {
        let (conn, epoch) = self.connected()?;
        let options = options.unwrap_or_default();
        let rows = options.rows.unwrap_or(DEFAULT_ROWS);
        let cols = options.cols.unwrap_or(DEFAULT_COLS);
        let term = options.term.unwrap_or_else(|| DEFAULT_TERM.to_string());

        let shell = match ShellChannel::open(&conn, rows, cols, &term).await {
            Ok(shell) => Arc::new(shell),
            Err(e) => {
                warn!("[Shell] Failed to open shell: {}", e);
                self.reflect_error(epoch, &e);
                return Err(e);
            }
        };
        let reader = shell.take_reader();

        let previous = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                None
            } else {
                if let Some(reader) = reader {
                    let task = tokio::spawn(forward_output(
                        Arc::downgrade(self),
                        reader,
                        Arc::downgrade(&shell),
                    ));
                    shared.tasks.push(task);
                }
                shared.shell_request = Some(ShellOptions {
                    rows: Some(rows),
                    cols: Some(cols),
                    term: Some(term.clone()),
                });
                Some(shared.shell.replace(shell.clone()))
            }
        };

        match previous {
            // 打开期间连接已断开或被替换
            None => {
                shell.close().await;
                Err(SshError::NotConnected)
            }
            Some(old) => {
                if let Some(old) = old {
                    old.close().await;
                }
                info!("[Shell] Shell opened ({}x{}, {})", cols, rows, term);
                Ok(())
            }
        }
    }

    fn begin_connect(
        &self,
        profile_id: &str,
        from_reconnect: bool,
    ) -> Result<(u64, CancellationToken, Resources), SshError> {
        let mut shared = self.shared.lock();
        if shared.session.connecting {
            return Err(SshError::ConnectInProgress);
        }
        if !from_reconnect {
            if let Some(task) = shared.reconnect_task.take() {
                debug!("[Reconnect] Cancelled by new connection request");
                task.abort();
            }
            shared.shell_request = None;
        }

        shared.epoch += 1;
        let cancel = CancellationToken::new();
        shared.connect_cancel = Some(cancel.clone());
        shared.last_profile_id = Some(profile_id.to_string());
        let old = shared.take_resources();
        shared.publish(SessionState {
            connected: false,
            connecting: true,
            error: None,
            profile_id: Some(profile_id.to_string()),
        });
        Ok((shared.epoch, cancel, old))
    }

    async fn run_connect(
        self: &Arc<Self>,
        epoch: u64,
        cancel: CancellationToken,
        profile_id: String,
        old: Resources,
    ) -> Result<(), SshError> {
        teardown(old).await;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SshError::Cancelled),
            result = self.establish(&profile_id) => result,
        };

        let established = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                // disconnect() 或新的 connect() 已接管，丢弃结果且不修改状态
                Err(result.ok().map(|(conn, _)| conn))
            } else {
                shared.connect_cancel = None;
                match result {
                    Ok((conn, events)) => {
                        shared.connection = Some(conn.clone());
                        shared.publish(SessionState {
                            connected: true,
                            connecting: false,
                            error: None,
                            profile_id: Some(profile_id.clone()),
                        });

                        let weak = Arc::downgrade(self);
                        shared.tasks.push(tokio::spawn(keepalive_loop(
                            weak.clone(),
                            epoch,
                            conn,
                            self.config.keepalive_interval,
                        )));
                        shared
                            .tasks
                            .push(tokio::spawn(monitor_transport(weak, epoch, events)));
                        Ok(Ok(()))
                    }
                    Err(e) => {
                        warn!("[Session] Connection to profile {} failed: {}", profile_id, e);
                        shared.publish(SessionState {
                            connected: false,
                            connecting: false,
                            error: Some(e.to_string()),
                            profile_id: Some(profile_id.clone()),
                        });
                        Ok(Err(e))
                    }
                }
            }
        };

        match established {
            Ok(Ok(())) => {
                info!("[Session] Connected to profile {}", profile_id);
                if let Err(e) = self.profiles.mark_as_used(&profile_id).await {
                    warn!("[Session] Failed to record profile usage: {:#}", e);
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(stale) => {
                if let Some(conn) = stale {
                    debug!("[Session] Discarding connection completed after cancellation");
                    let _ = conn.close().await;
                }
                Err(SshError::Cancelled)
            }
        }
    }

    async fn establish(
        &self,
        profile_id: &str,
    ) -> Result<(Arc<TransportConnection>, mpsc::UnboundedReceiver<TransportEvent>), SshError> {
        let profile = self
            .profiles
            .get_profile(profile_id)
            .await
            .map_err(|e| SshError::Storage(format!("{:#}", e)))?
            .ok_or_else(|| SshError::ProfileNotFound(profile_id.to_string()))?;

        let credential = self.resolver.resolve(&profile).await?;

        let target = SshConfig {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            connect_timeout: self.config.connect_timeout,
        };
        let (conn, events) = TransportConnection::new(target);
        conn.open(self.transport.as_ref(), credential).await?;
        Ok((Arc::new(conn), events))
    }

    fn connected(&self) -> Result<(Arc<TransportConnection>, u64), SshError> {
        let shared = self.shared.lock();
        if !shared.session.connected {
            return Err(SshError::NotConnected);
        }
        let conn = shared.connection.clone().ok_or(SshError::NotConnected)?;
        Ok((conn, shared.epoch))
    }

    fn reflect_error(&self, epoch: u64, error: &SshError) {
        let mut shared = self.shared.lock();
        if shared.epoch == epoch {
            shared.reflect_error(error);
        }
    }

    /// 连接意外断开：更新状态、释放资源，按配置安排自动重连
    fn handle_connection_lost(self: &Arc<Self>, epoch: u64, reason: String) {
        let old = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch || !shared.session.connected {
                return;
            }
            warn!("[Session] Connection lost: {}", reason);
            shared.epoch += 1;
            let old = shared.take_resources();
            let profile_id = shared.session.profile_id.clone();
            shared.publish(SessionState {
                connected: false,
                connecting: false,
                error: Some(reason),
                profile_id: profile_id.clone(),
            });

            if self.config.reconnect.enabled {
                if let Some(profile_id) = profile_id {
                    let task = tokio::spawn(reconnect_loop(
                        Arc::downgrade(self),
                        Backoff::from_config(&self.config.reconnect),
                        profile_id,
                    ));
                    if let Some(previous) = shared.reconnect_task.replace(task) {
                        previous.abort();
                    }
                }
            }
            old
        };
        tokio::spawn(teardown(old));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.abort_tasks();
        if let Some(task) = shared.reconnect_task.take() {
            task.abort();
        }
        if let Some(cancel) = shared.connect_cancel.take() {
            cancel.cancel();
        }
    }
}

/// 调用方丢弃 connect future 时撤销 connecting 状态
struct ConnectGuard {
    inner: Weak<Inner>,
    epoch: u64,
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut shared = inner.shared.lock();
        if shared.epoch != self.epoch || !shared.session.connecting {
            return;
        }
        debug!("[Session] Connection attempt abandoned by caller");
        shared.epoch += 1;
        if let Some(cancel) = shared.connect_cancel.take() {
            cancel.cancel();
        }
        let next = SessionState {
            connected: false,
            connecting: false,
            error: Some(SshError::Cancelled.to_string()),
            profile_id: shared.session.profile_id.clone(),
        };
        shared.publish(next);
    }
}

/// 先关闭 Shell，再关闭连接
async fn teardown((shell, conn): Resources) {
    if let Some(shell) = shell {
        shell.close().await;
    }
    if let Some(conn) = conn {
        if let Err(e) = conn.close().await {
            debug!("[Session] Error while closing connection: {}", e);
        }
    }
}

async fn keepalive_loop(
    inner: Weak<Inner>,
    epoch: u64,
    conn: Arc<TransportConnection>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match conn.keepalive().await {
            Ok(()) => debug!("[Session] Keep-alive ok"),
            Err(e) => {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_connection_lost(epoch, format!("Keep-alive failed: {}", e));
                }
                break;
            }
        }
    }
}

async fn monitor_transport(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        if let TransportEvent::Lost { reason } = event {
            if let Some(inner) = inner.upgrade() {
                inner.handle_connection_lost(epoch, reason);
            }
            break;
        }
    }
}

async fn reconnect_loop(inner: Weak<Inner>, backoff: Backoff, profile_id: String) {
    let outcome = reconnect::run(backoff, |attempt| {
        let inner = inner.clone();
        let profile_id = profile_id.clone();
        async move {
            let inner = inner.upgrade().ok_or(SshError::Cancelled)?;
            debug!("[Reconnect] Attempt {} for profile {}", attempt, profile_id);
            inner.start_connect(profile_id, true).await?;

            // 断线前打开过 Shell 的，重连后恢复
            let request = inner.shared.lock().shell_request.clone();
            if let Some(options) = request {
                info!("[Reconnect] Restoring shell");
                inner.open_shell(Some(options)).await?;
            }
            Ok(())
        }
    })
    .await;

    if let ReconnectOutcome::GaveUp(e) = outcome {
        debug!("[Reconnect] Stopped: {}", e);
    }
}

/// 把 Shell 输出按顺序分发给所有数据订阅者
async fn forward_output(inner: Weak<Inner>, mut reader: ShellReader, shell: Weak<ShellChannel>) {
    while let Some(chunk) = reader.next_chunk().await {
        let subscribers = match inner.upgrade() {
            Some(inner) => inner.shared.lock().data_subs.clone(),
            None => return,
        };

        let mut dropped = false;
        for tx in &subscribers {
            if tx.send(chunk.clone()).await.is_err() {
                dropped = true;
            }
        }
        if dropped {
            if let Some(inner) = inner.upgrade() {
                inner.shared.lock().data_subs.retain(|tx| !tx.is_closed());
            }
        }
    }

    // 远端关闭了 Shell，连接仍然保留
    if let Some(inner) = inner.upgrade() {
        let mut shared = inner.shared.lock();
        let is_current = shared
            .shell
            .as_ref()
            .is_some_and(|current| Weak::ptr_eq(&Arc::downgrade(current), &shell));
        if is_current {
            shared.shell = None;
            // 连接本身已断开时保留参数，等待重连后恢复
            let alive = shared
                .connection
                .as_ref()
                .is_some_and(|conn| conn.is_alive());
            if alive {
                shared.shell_request = None;
                info!("[Shell] Shell closed by remote");
            }
        }
    }
}
