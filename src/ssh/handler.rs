// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tracing::{info, warn};

/// 主机密钥校验结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyDecision {
    Accept,
    Reject,
}

/// 主机密钥校验（known_hosts）
#[async_trait]
pub trait HostKeyVerifier: Send + Sync {
    /// `host` 为 host:port，`fingerprint` 为 `SHA256:...`
    async fn verify(&self, host: &str, key_type: &str, fingerprint: &str) -> HostKeyDecision;
}

/// SSH 客户端 Handler
pub struct ClientHandler {
    /// host:port
    host: String,
    verifier: Arc<dyn HostKeyVerifier>,
    /// 被拒绝的服务器指纹，握手失败后用于生成 HostKeyRejected
    rejected: Arc<Mutex<Option<String>>>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        verifier: Arc<dyn HostKeyVerifier>,
        rejected: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            host,
            verifier,
            rejected,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        let key_type = server_public_key.algorithm().to_string();
        let host = self.host.clone();
        let verifier = self.verifier.clone();
        let rejected = self.rejected.clone();

        async move {
            info!("[SSH] Server key for {}: {} {}", host, key_type, fingerprint);
            match verifier.verify(&host, &key_type, &fingerprint).await {
                HostKeyDecision::Accept => Ok(true),
                HostKeyDecision::Reject => {
                    warn!("[SSH] Host key for {} rejected", host);
                    *rejected.lock() = Some(fingerprint);
                    Ok(false)
                }
            }
        }
    }
}
