// 凭据解析
//
// 每次连接时从配置存储 / 密钥存储中取出认证材料，认证结束后立即清零。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::SshError;
use crate::models::{AuthType, ConnectionProfile};

/// 连接配置存储（外部协作者）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn get_profile(&self, id: &str) -> anyhow::Result<Option<ConnectionProfile>>;
    async fn mark_as_used(&self, id: &str) -> anyhow::Result<()>;
}

/// 密钥存储（外部协作者）
///
/// 受保护的存储可能在返回前要求设备级认证，失败时直接返回错误。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn get_key(&self, key_id: &str) -> anyhow::Result<Option<KeyMaterial>>;
}

/// 密钥存储返回的私钥材料
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    private_key: Vec<u8>,
    passphrase: Option<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(private_key: impl Into<Vec<u8>>, passphrase: Option<Vec<u8>>) -> Self {
        Self {
            private_key: private_key.into(),
            passphrase,
        }
    }
}

/// 凭据类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    Key,
    Password,
}

/// 单次连接使用的认证材料
///
/// 不持久化、不缓存；drop 时清零。
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ResolvedCredential {
    #[zeroize(skip)]
    kind: CredentialKind,
    secret: Vec<u8>,
    passphrase: Option<Vec<u8>>,
}

impl ResolvedCredential {
    pub fn password(password: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: CredentialKind::Password,
            secret: password.into(),
            passphrase: None,
        }
    }

    pub fn private_key(key: impl Into<Vec<u8>>, passphrase: Option<Vec<u8>>) -> Self {
        Self {
            kind: CredentialKind::Key,
            secret: key.into(),
            passphrase,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn passphrase(&self) -> Option<&[u8]> {
        self.passphrase.as_deref()
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("kind", &self.kind)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// 凭据解析器
#[derive(Clone)]
pub struct CredentialResolver {
    keys: Arc<dyn KeyProvider>,
}

impl CredentialResolver {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// 解析连接配置对应的认证材料
    pub async fn resolve(&self, profile: &ConnectionProfile) -> Result<ResolvedCredential, SshError> {
        match profile.auth_type {
            AuthType::Key => {
                let key_id = profile
                    .key_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        SshError::ProfileIncomplete(format!(
                            "profile '{}' uses key authentication but has no key",
                            profile.id
                        ))
                    })?;

                debug!("[Credential] Loading key '{}' for profile {}", key_id, profile.id);
                let mut material = self
                    .keys
                    .get_key(key_id)
                    .await
                    .map_err(|e| SshError::Storage(format!("{:#}", e)))?
                    .ok_or_else(|| SshError::KeyNotFound(key_id.to_string()))?;

                Ok(ResolvedCredential::private_key(
                    std::mem::take(&mut material.private_key),
                    material.passphrase.take(),
                ))
            }
            AuthType::Password => {
                let password = profile
                    .password
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        SshError::ProfileIncomplete(format!(
                            "profile '{}' uses password authentication but has no password",
                            profile.id
                        ))
                    })?;
                Ok(ResolvedCredential::password(password.as_bytes()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn profile(auth_type: AuthType, key_id: Option<&str>, password: Option<&str>) -> ConnectionProfile {
        ConnectionProfile {
            id: "p1".into(),
            name: "Test".into(),
            host: "192.168.1.100".into(),
            port: 22,
            username: "testuser".into(),
            key_id: key_id.map(String::from),
            password: password.map(String::from),
            auth_type,
            last_used: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resolves_password() {
        let resolver = CredentialResolver::new(Arc::new(MockKeyProvider::new()));
        let credential = resolver
            .resolve(&profile(AuthType::Password, None, Some("secret")))
            .await
            .unwrap();
        assert_eq!(credential.kind(), CredentialKind::Password);
        assert_eq!(credential.secret(), b"secret");
        assert!(credential.passphrase().is_none());
    }

    #[tokio::test]
    async fn test_resolves_key_with_passphrase() {
        let mut keys = MockKeyProvider::new();
        keys.expect_get_key()
            .with(eq("k1"))
            .times(1)
            .returning(|_| Ok(Some(KeyMaterial::new("PEM", Some(b"phrase".to_vec())))));

        let resolver = CredentialResolver::new(Arc::new(keys));
        let credential = resolver
            .resolve(&profile(AuthType::Key, Some("k1"), None))
            .await
            .unwrap();
        assert_eq!(credential.kind(), CredentialKind::Key);
        assert_eq!(credential.secret(), b"PEM");
        assert_eq!(credential.passphrase(), Some(&b"phrase"[..]));
    }

    #[tokio::test]
    async fn test_missing_credentials_are_incomplete() {
        let resolver = CredentialResolver::new(Arc::new(MockKeyProvider::new()));

        let err = resolver
            .resolve(&profile(AuthType::Key, None, Some("ignored")))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::ProfileIncomplete(_)));

        let err = resolver
            .resolve(&profile(AuthType::Password, Some("k1"), Some("")))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::ProfileIncomplete(_)));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let mut keys = MockKeyProvider::new();
        keys.expect_get_key().returning(|_| Ok(None));

        let resolver = CredentialResolver::new(Arc::new(keys));
        let err = resolver
            .resolve(&profile(AuthType::Key, Some("gone"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::KeyNotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn test_key_store_failure_propagates() {
        let mut keys = MockKeyProvider::new();
        keys.expect_get_key()
            .returning(|_| Err(anyhow::anyhow!("device authentication cancelled")));

        let resolver = CredentialResolver::new(Arc::new(keys));
        let err = resolver
            .resolve(&profile(AuthType::Key, Some("k1"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Storage(msg) if msg.contains("cancelled")));
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = ResolvedCredential::password("hunter2");
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("hunter2"));
    }
}
