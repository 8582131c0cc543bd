// 集成测试用的内存传输实现
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use termpal::models::{AuthType, ProfileDraft};
use termpal::services::{KeyManager, ProfileStore, StorageBackend};
use termpal::ssh::{
    CommandOutput, CredentialKind, PtyRequest, ResolvedCredential, SessionConfig, SessionManager,
    ShellChannel, ShellInput, SshConfig, SshError, Transport, TransportLink, TransportSession,
    TransportState,
};

/// 下一次连接的结果
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Succeed,
    Refused,
    Timeout,
    HostKeyRejected,
    AuthFail,
}

#[derive(Default)]
pub struct FakeState {
    outcomes: Mutex<VecDeque<Outcome>>,
    pub attempts: Mutex<Vec<Instant>>,
    pub credentials: Mutex<Vec<CredentialKind>>,
    pub targets: Mutex<Vec<SshConfig>>,
    links: Mutex<Vec<TransportLink>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// (term, cols, rows)
    pub shells: Mutex<Vec<(String, u32, u32)>>,
    /// (cols, rows)
    pub resizes: Mutex<Vec<(u32, u32)>>,
    pub keepalives: AtomicUsize,
    pub keepalive_fails: AtomicBool,
    pub closes: AtomicUsize,
    exec_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// 可编排的内存传输
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次指定后续连接的结果，用完后默认成功
    pub fn script(&self, outcomes: &[Outcome]) {
        self.state.outcomes.lock().extend(outcomes.iter().copied());
    }

    /// 之后的连接在 `release()` 之前一直挂起
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn release(&self) {
        if let Some(gate) = self.state.gate.lock().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.attempts.lock().clone()
    }

    /// 模拟网络断开
    pub fn drop_connection(&self) {
        if let Some(link) = self.state.links.lock().last() {
            link.lost("Connection reset by peer");
        }
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        *self.state.exec_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        target: &SshConfig,
        credential: ResolvedCredential,
        link: TransportLink,
    ) -> Result<Arc<dyn TransportSession>, SshError> {
        self.state.attempts.lock().push(Instant::now());
        self.state.credentials.lock().push(credential.kind());
        self.state.targets.lock().push(target.clone());
        drop(credential);

        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let outcome = self
            .state
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(Outcome::Succeed);
        match outcome {
            Outcome::Refused => Err(SshError::Transport("Connection refused".into())),
            Outcome::Timeout => Err(SshError::ConnectTimeout(target.connect_timeout)),
            Outcome::HostKeyRejected => Err(SshError::HostKeyRejected {
                host: target.address(),
                fingerprint: "SHA256:mismatch".into(),
            }),
            Outcome::AuthFail => {
                link.advance(TransportState::Authenticating);
                Err(SshError::AuthenticationFailed("Permission denied".into()))
            }
            Outcome::Succeed => {
                link.advance(TransportState::Authenticating);
                self.state.links.lock().push(link);
                Ok(Arc::new(FakeSession {
                    state: self.state.clone(),
                }))
            }
        }
    }
}

struct FakeSession {
    state: Arc<FakeState>,
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn open_shell(
        &self,
        pty: &PtyRequest,
        cancel: CancellationToken,
    ) -> Result<ShellChannel, SshError> {
        self.state
            .shells
            .lock()
            .push((pty.term.clone(), pty.col_width, pty.row_height));

        let (shell, mut peer) = ShellChannel::pair(pty);
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    input = peer.recv() => match input {
                        Some(ShellInput::Data(bytes)) => {
                            if bytes == b"exit\n" {
                                break;
                            }
                            peer.send_output(bytes).await;
                        }
                        Some(ShellInput::Resize { cols, rows }) => {
                            state.resizes.lock().push((cols, rows));
                        }
                        Some(ShellInput::Close) | None => break,
                    },
                }
            }
        });
        Ok(shell)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.state.exec_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let output = |stdout: &str, stderr: &str, exit_code| CommandOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
        };
        match command {
            "pwd" => Ok(output("/home/mockuser\n", "", 0)),
            "whoami" => Ok(output("mockuser\n", "", 0)),
            "false" => Ok(output("", "", 1)),
            "broken-channel" => Err(SshError::Channel("Channel open refused".into())),
            other => match other.strip_prefix("echo ") {
                Some(text) => Ok(output(&format!("{}\n", text), "", 0)),
                None => Ok(output(
                    "",
                    &format!("bash: {}: command not found\n", other),
                    127,
                )),
            },
        }
    }

    async fn keepalive(&self) -> Result<(), SshError> {
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
        if self.state.keepalive_fails.load(Ordering::SeqCst) {
            return Err(SshError::Transport("Keep-alive timed out".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SshError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 测试环境：明文存储上的配置 / 密钥服务 + 内存传输
pub struct Harness {
    _dir: tempfile::TempDir,
    pub transport: FakeTransport,
    pub profiles: ProfileStore,
    pub keys: KeyManager,
    pub manager: SessionManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(StorageBackend::plain(dir.path()).expect("storage"));
        let profiles = ProfileStore::new(storage.clone());
        let keys = KeyManager::new(storage);
        let transport = FakeTransport::new();
        let manager = SessionManager::new(
            config,
            Arc::new(profiles.clone()),
            Arc::new(keys.clone()),
            Arc::new(transport.clone()),
        );
        Self {
            _dir: dir,
            transport,
            profiles,
            keys,
            manager,
        }
    }

    /// 密码认证的配置
    pub fn password_profile(&self) -> String {
        self.profiles
            .create(ProfileDraft {
                name: "Test Server".into(),
                host: "192.168.1.100".into(),
                port: 22,
                username: "testuser".into(),
                key_id: None,
                password: Some("testpass".into()),
                auth_type: AuthType::Password,
            })
            .expect("create profile")
            .id
    }

    /// 密钥认证的配置，引用名为 `key_id` 的密钥
    pub fn key_profile(&self, key_id: &str) -> String {
        self.profiles
            .create(ProfileDraft {
                name: "Key Server".into(),
                host: "192.168.1.100".into(),
                port: 22,
                username: "testuser".into(),
                key_id: Some(key_id.into()),
                password: None,
                auth_type: AuthType::Key,
            })
            .expect("create profile")
            .id
    }

    /// 没有任何凭据的配置（导入得到）
    pub fn incomplete_profile(&self) -> String {
        self.profiles
            .import(
                r#"{"name":"Imported","host":"10.0.0.5","port":22,"username":"root","auth_type":"password"}"#,
            )
            .expect("import profile")
            .id
    }
}

/// 轮询直到条件成立
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// 取出通道中已有的所有值
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut values = Vec::new();
    while let Ok(value) = rx.try_recv() {
        values.push(value);
    }
    values
}
