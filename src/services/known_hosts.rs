// Known Hosts 存储
// 记录服务器公钥指纹，连接时校验

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use tracing::{error, info, warn};

use super::storage::StorageBackend;
use crate::models::{KnownHost, KnownHostsConfig};
use crate::ssh::config::HostKeyPolicy;
use crate::ssh::handler::{HostKeyDecision, HostKeyVerifier};

const KNOWN_HOSTS_KEY: &str = "known_hosts";

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// 已知主机存储
#[derive(Clone)]
pub struct KnownHostsStore {
    storage: Arc<StorageBackend>,
    policy: HostKeyPolicy,
}

impl KnownHostsStore {
    pub fn new(storage: Arc<StorageBackend>, policy: HostKeyPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn load(&self) -> Result<KnownHostsConfig> {
        Ok(self.storage.get(KNOWN_HOSTS_KEY)?.unwrap_or_default())
    }

    pub fn find(&self, host: &str) -> Result<Option<KnownHost>> {
        Ok(self.load()?.find(host).cloned())
    }

    /// 添加或替换主机记录
    pub fn trust(&self, host: &str, key_type: &str, fingerprint: &str) -> Result<()> {
        self.storage
            .update(KNOWN_HOSTS_KEY, |config: &mut KnownHostsConfig| {
                let timestamp = now();
                config.hosts.retain(|h| h.host != host);
                config.hosts.push(KnownHost {
                    host: host.to_string(),
                    key_type: key_type.to_string(),
                    fingerprint: fingerprint.to_string(),
                    first_seen: timestamp.clone(),
                    last_used: timestamp,
                });
                Ok(())
            })
    }

    /// 删除主机记录（服务器重装后需要重新信任）
    pub fn forget(&self, host: &str) -> Result<bool> {
        self.storage
            .update(KNOWN_HOSTS_KEY, |config: &mut KnownHostsConfig| {
                let before = config.hosts.len();
                config.hosts.retain(|h| h.host != host);
                Ok(config.hosts.len() != before)
            })
    }

    fn touch(&self, host: &str) -> Result<()> {
        self.storage
            .update(KNOWN_HOSTS_KEY, |config: &mut KnownHostsConfig| {
                if let Some(entry) = config.hosts.iter_mut().find(|h| h.host == host) {
                    entry.last_used = now();
                }
                Ok(())
            })
    }

    fn check(&self, host: &str, key_type: &str, fingerprint: &str) -> Result<HostKeyDecision> {
        match self.find(host)? {
            Some(known) if known.fingerprint == fingerprint => {
                if let Err(e) = self.touch(host) {
                    warn!("[KnownHosts] Failed to update last used for {}: {:#}", host, e);
                }
                Ok(HostKeyDecision::Accept)
            }
            Some(known) => {
                error!(
                    "[KnownHosts] Host key mismatch for {}: expected {}, got {}",
                    host, known.fingerprint, fingerprint
                );
                Ok(HostKeyDecision::Reject)
            }
            None => match self.policy {
                HostKeyPolicy::AcceptNew => {
                    info!("[KnownHosts] Trusting new host {} ({})", host, fingerprint);
                    self.trust(host, key_type, fingerprint)?;
                    Ok(HostKeyDecision::Accept)
                }
                HostKeyPolicy::Strict => {
                    warn!("[KnownHosts] Unknown host {} rejected by strict policy", host);
                    Ok(HostKeyDecision::Reject)
                }
            },
        }
    }
}

#[async_trait]
impl HostKeyVerifier for KnownHostsStore {
    async fn verify(&self, host: &str, key_type: &str, fingerprint: &str) -> HostKeyDecision {
        let store = self.clone();
        let (target, key_type, fingerprint) =
            (host.to_string(), key_type.to_string(), fingerprint.to_string());
        let checked = tokio::task::spawn_blocking(move || {
            store.check(&target, &key_type, &fingerprint)
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
        match checked {
            Ok(decision) => decision,
            Err(e) => {
                // 无法确认时不信任
                error!("[KnownHosts] Verification failed for {}: {:#}", host, e);
                HostKeyDecision::Reject
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::test_backend;

    const HOST: &str = "192.168.1.100:22";

    fn store(policy: HostKeyPolicy) -> (tempfile::TempDir, KnownHostsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownHostsStore::new(Arc::new(test_backend(dir.path())), policy);
        (dir, store)
    }

    #[tokio::test]
    async fn test_accept_new_records_then_pins() {
        let (_dir, store) = store(HostKeyPolicy::AcceptNew);

        let first = store.verify(HOST, "ssh-ed25519", "SHA256:aaa").await;
        assert_eq!(first, HostKeyDecision::Accept);
        let recorded = store.find(HOST).unwrap().unwrap();
        assert_eq!(recorded.fingerprint, "SHA256:aaa");
        assert_eq!(recorded.key_type, "ssh-ed25519");

        assert_eq!(
            store.verify(HOST, "ssh-ed25519", "SHA256:aaa").await,
            HostKeyDecision::Accept
        );
        assert_eq!(
            store.verify(HOST, "ssh-ed25519", "SHA256:bbb").await,
            HostKeyDecision::Reject
        );
        // 不匹配时保留原记录
        assert_eq!(store.find(HOST).unwrap().unwrap().fingerprint, "SHA256:aaa");
    }

    #[tokio::test]
    async fn test_strict_rejects_unknown() {
        let (_dir, store) = store(HostKeyPolicy::Strict);
        assert_eq!(
            store.verify(HOST, "ssh-ed25519", "SHA256:aaa").await,
            HostKeyDecision::Reject
        );
        assert!(store.find(HOST).unwrap().is_none());

        store.trust(HOST, "ssh-ed25519", "SHA256:aaa").unwrap();
        assert_eq!(
            store.verify(HOST, "ssh-ed25519", "SHA256:aaa").await,
            HostKeyDecision::Accept
        );
    }

    #[tokio::test]
    async fn test_forget_allows_new_key() {
        let (_dir, store) = store(HostKeyPolicy::AcceptNew);
        store.trust(HOST, "ssh-ed25519", "SHA256:old").unwrap();
        assert!(store.forget(HOST).unwrap());
        assert!(!store.forget(HOST).unwrap());
        assert_eq!(
            store.verify(HOST, "ssh-ed25519", "SHA256:new").await,
            HostKeyDecision::Accept
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_verify_does_not_block_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (_dir, store) = store(HostKeyPolicy::AcceptNew);
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        let decision = store.verify(HOST, "ssh-ed25519", "SHA256:aaa").await;
        ticker.abort();

        assert_eq!(decision, HostKeyDecision::Accept);
        // 存储读写期间其他任务仍能在同一线程上运行
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
