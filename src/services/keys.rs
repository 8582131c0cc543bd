// SSH 密钥管理

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use russh::keys::ssh_key::{HashAlg, LineEnding};
use russh::keys::{Algorithm, PrivateKey};
use tracing::info;

use super::storage::StorageBackend;
use crate::models::KeyPair;
use crate::ssh::credential::{KeyMaterial, KeyProvider};

const KEYS_KEY: &str = "ssh_key_list";

/// 密钥存储
#[derive(Clone)]
pub struct KeyManager {
    storage: Arc<StorageBackend>,
}

impl KeyManager {
    pub fn new(storage: Arc<StorageBackend>) -> Self {
        Self { storage }
    }

    pub fn all(&self) -> Result<Vec<KeyPair>> {
        Ok(self.storage.get(KEYS_KEY)?.unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Result<Option<KeyPair>> {
        Ok(self.all()?.into_iter().find(|k| k.name == name))
    }

    /// 生成 Ed25519 密钥对并保存
    pub fn generate(&self, name: &str) -> Result<KeyPair> {
        let name = checked_name(name)?;
        let private = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .context("Failed to generate Ed25519 key")?;
        let key = describe(name, &private, None)?;
        self.save(key.clone())?;
        info!("[Keys] Generated key '{}' ({})", key.name, key.fingerprint);
        Ok(key)
    }

    /// 导入 OpenSSH 私钥
    pub fn import(&self, name: &str, private_key: &str, passphrase: Option<&str>) -> Result<KeyPair> {
        let name = checked_name(name)?;
        let private = russh::keys::decode_secret_key(private_key, passphrase)
            .context("Failed to decode private key")?;
        let mut key = describe(name, &private, passphrase)?;
        // 保留原始（可能加密的）私钥文本
        key.private_key = private_key.to_string();
        self.save(key.clone())?;
        info!("[Keys] Imported key '{}' ({})", key.name, key.fingerprint);
        Ok(key)
    }

    /// 保存密钥，名称重复时失败
    pub fn save(&self, key: KeyPair) -> Result<()> {
        self.storage.update(KEYS_KEY, |keys: &mut Vec<KeyPair>| {
            if keys.iter().any(|k| k.name == key.name) {
                bail!("Key '{}' already exists", key.name);
            }
            keys.push(key);
            Ok(())
        })
    }

    /// 删除密钥，返回是否存在
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.storage.update(KEYS_KEY, |keys: &mut Vec<KeyPair>| {
            let before = keys.len();
            keys.retain(|k| k.name != name);
            Ok(keys.len() != before)
        })
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Key name is required");
    }
    Ok(name)
}

fn describe(name: &str, private: &PrivateKey, passphrase: Option<&str>) -> Result<KeyPair> {
    let public = private.public_key();
    let public_key = format!(
        "{} {}",
        public
            .to_openssh()
            .context("Failed to encode public key to OpenSSH format")?,
        name
    );
    let private_key = private
        .to_openssh(LineEnding::LF)
        .context("Failed to encode private key to OpenSSH format")?;

    Ok(KeyPair {
        name: name.to_string(),
        public_key,
        private_key: private_key.to_string(),
        fingerprint: public.fingerprint(HashAlg::Sha256).to_string(),
        passphrase: passphrase.map(String::from),
        created_at: Utc::now(),
    })
}

#[async_trait]
impl KeyProvider for KeyManager {
    async fn get_key(&self, key_id: &str) -> Result<Option<KeyMaterial>> {
        let manager = self.clone();
        let key_id = key_id.to_string();
        let key = tokio::task::spawn_blocking(move || manager.get(&key_id))
            .await
            .context("Key lookup task failed")??;
        Ok(key.map(|key| {
            KeyMaterial::new(
                key.private_key.clone().into_bytes(),
                key.passphrase.clone().map(String::into_bytes),
            )
        }))
    }
}
