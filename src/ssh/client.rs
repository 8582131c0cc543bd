// SSH 客户端核心实现

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{AuthResult, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::config::SshConfig;
use super::connection::TransportLink;
use super::credential::{CredentialKind, ResolvedCredential};
use super::error::SshError;
use super::event::TransportState;
use super::handler::{ClientHandler, HostKeyVerifier};
use super::session::RusshSession;
use super::transport::{Transport, TransportSession};

/// 断线检测间隔
const LOSS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 基于 russh 的传输实现
pub struct RusshTransport {
    verifier: Arc<dyn HostKeyVerifier>,
}

impl RusshTransport {
    pub fn new(verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(
        &self,
        target: &SshConfig,
        credential: ResolvedCredential,
        link: TransportLink,
    ) -> Result<Arc<dyn TransportSession>, SshError> {
        let address = target.address();

        // TCP 连接
        debug!("[SSH] Opening TCP connection to {}", address);
        let tcp_stream = timeout(target.timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| SshError::ConnectTimeout(target.connect_timeout))??;
        let _ = tcp_stream.set_nodelay(true);

        // SSH 握手
        debug!("[SSH] Starting SSH handshake with {}", address);
        let rejected = Arc::new(Mutex::new(None));
        let handler = ClientHandler::new(address.clone(), self.verifier.clone(), rejected.clone());
        let russh_config = Arc::new(target.to_russh_config());

        let handshake = timeout(
            target.timeout(),
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout(target.connect_timeout))?;

        let mut handle = match handshake {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(fingerprint) = rejected.lock().take() {
                    return Err(SshError::HostKeyRejected {
                        host: address,
                        fingerprint,
                    });
                }
                return Err(SshError::from(e));
            }
        };

        // 认证
        link.advance(TransportState::Authenticating);
        info!("[SSH] Authenticating as '{}'", target.username);
        authenticate(&mut handle, &target.username, &credential).await?;
        drop(credential);
        info!("[SSH] Authentication successful");

        let handle = Arc::new(handle);
        spawn_loss_watcher(handle.clone(), link);
        Ok(Arc::new(RusshSession::new(handle, address)))
    }
}

/// 执行认证，只使用给定的凭据，不会换用其他方式重试
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    credential: &ResolvedCredential,
) -> Result<(), SshError> {
    let result = match credential.kind() {
        CredentialKind::Password => {
            debug!("[SSH] Using password authentication");
            let password = std::str::from_utf8(credential.secret())
                .map_err(|_| SshError::Config("Password is not valid UTF-8".to_string()))?;
            handle
                .authenticate_password(username, password)
                .await
                .map_err(SshError::from)?
        }
        CredentialKind::Key => {
            debug!("[SSH] Using public key authentication");
            let pem = std::str::from_utf8(credential.secret())
                .map_err(|_| SshError::Key("Private key is not valid UTF-8".to_string()))?;
            let passphrase = credential
                .passphrase()
                .map(std::str::from_utf8)
                .transpose()
                .map_err(|_| SshError::Key("Passphrase is not valid UTF-8".to_string()))?;

            let key = russh::keys::decode_secret_key(pem, passphrase)
                .map_err(|e| SshError::Key(format!("Failed to decode key: {}", e)))?;
            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            handle
                .authenticate_publickey(username, key_with_alg)
                .await
                .map_err(SshError::from)?
        }
    };

    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            if partial_success {
                return Err(SshError::AuthenticationFailed(
                    "Partial authentication - additional auth required".to_string(),
                ));
            }
            Err(SshError::AuthenticationFailed(format!(
                "Server rejected credentials. Server suggests: {:?}",
                remaining_methods
            )))
        }
    }
}

/// 后台检测连接断开并通过 link 上报
fn spawn_loss_watcher(handle: Arc<Handle<ClientHandler>>, link: TransportLink) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LOSS_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let state = link.state();
            if state == TransportState::Closing || state.is_terminal() {
                break;
            }
            if handle.is_closed() {
                link.lost("Connection closed by remote host");
                break;
            }
        }
    });
}
