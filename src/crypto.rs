//! 本地加密工具
//!
//! 用口令派生的密钥保护本地存储的敏感数据：
//! - PBKDF2-HMAC-SHA256（100,000 轮）从口令和 16 字节随机盐派生 256 位密钥
//! - AES-256-GCM 加密，每次使用新的 12 字节随机 nonce
//! - 输出 `salt ‖ nonce ‖ ciphertext(含 tag)` 的 base64 编码

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// PBKDF2 迭代次数
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+-=[]{}|;:,.<>?";

/// 加密错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// 口令错误或数据损坏
    #[error("Decryption failed: invalid password or corrupted data")]
    DecryptionFailed,
    /// 解密结果不是合法 JSON
    #[error("Failed to parse decrypted data as JSON: {0}")]
    MalformedPayload(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// 口令加密工具
#[derive(Clone, Debug)]
pub struct EncryptionHelper {
    iterations: u32,
}

impl Default for EncryptionHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionHelper {
    pub fn new() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }

    /// 测试用：降低迭代次数
    #[cfg(test)]
    pub(crate) fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut *key);
        key
    }

    /// 加密任意字节
    pub fn encrypt(&self, plaintext: &[u8], password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(password, &salt);
        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| CryptoError::Encryption(format!("Failed to create cipher: {}", e)))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// 解密 [`encrypt`](Self::encrypt) 的输出
    ///
    /// 任何 tag 校验失败都返回 `DecryptionFailed`，不会返回错误的明文。
    pub fn decrypt(&self, blob: &str, password: &str) -> Result<Vec<u8>> {
        let combined = BASE64
            .decode(blob.trim())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if combined.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let (salt, rest) = combined.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(password, salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// 序列化为 JSON 后加密
    pub fn encrypt_object<T: Serialize>(&self, value: &T, password: &str) -> Result<String> {
        let json = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CryptoError::Encryption(e.to_string()))?,
        );
        self.encrypt(&json, password)
    }

    /// 解密后按 JSON 反序列化
    pub fn decrypt_object<T: DeserializeOwned>(&self, blob: &str, password: &str) -> Result<T> {
        let plaintext = Zeroizing::new(self.decrypt(blob, password)?);
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::MalformedPayload(e.to_string()))
    }
}

/// 随机口令的默认长度
pub const DEFAULT_PASSWORD_LEN: usize = 32;

/// 生成默认长度的随机口令
pub fn generate_default_password() -> String {
    generate_password(DEFAULT_PASSWORD_LEN)
}

/// 生成随机口令
pub fn generate_password(length: usize) -> String {
    let mut bytes = Zeroizing::new(vec![0u8; length]);
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| PASSWORD_ALPHABET[*b as usize % PASSWORD_ALPHABET.len()] as char)
        .collect()
}

/// SHA-256 十六进制摘要，用于非机密的指纹
pub fn hash(input: &[u8]) -> String {
    Sha256::digest(input)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_round_trip() {
        let helper = EncryptionHelper::new();
        let blob = helper.encrypt(b"secret payload", "hunter2").unwrap();
        assert_eq!(helper.decrypt(&blob, "hunter2").unwrap(), b"secret payload");
    }

    #[test]
    fn test_wrong_password_fails() {
        let helper = EncryptionHelper::new();
        let blob = helper.encrypt(b"secret payload", "hunter2").unwrap();
        assert_eq!(
            helper.decrypt(&blob, "hunter3"),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_blob_layout_and_fresh_randomness() {
        let helper = EncryptionHelper::with_iterations(1_000);
        let a = BASE64.decode(helper.encrypt(b"abc", "pw").unwrap()).unwrap();
        let b = BASE64.decode(helper.encrypt(b"abc", "pw").unwrap()).unwrap();
        assert_eq!(a.len(), SALT_LEN + NONCE_LEN + 3 + TAG_LEN);
        assert_ne!(a[..SALT_LEN], b[..SALT_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_or_truncated_blob_fails() {
        let helper = EncryptionHelper::with_iterations(1_000);
        let mut raw = BASE64.decode(helper.encrypt(b"payload", "pw").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert_eq!(
            helper.decrypt(&BASE64.encode(&raw), "pw"),
            Err(CryptoError::DecryptionFailed)
        );

        assert_eq!(
            helper.decrypt(&BASE64.encode(&raw[..20]), "pw"),
            Err(CryptoError::DecryptionFailed)
        );
        assert_eq!(
            helper.decrypt("not base64!!", "pw"),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_empty_plaintext() {
        let helper = EncryptionHelper::with_iterations(1_000);
        let blob = helper.encrypt(b"", "pw").unwrap();
        assert!(helper.decrypt(&blob, "pw").unwrap().is_empty());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Secret {
        user: String,
        port: u16,
    }

    #[test]
    fn test_object_round_trip() {
        let helper = EncryptionHelper::with_iterations(1_000);
        let value = Secret {
            user: "testuser".into(),
            port: 22,
        };
        let blob = helper.encrypt_object(&value, "pw").unwrap();
        let back: Secret = helper.decrypt_object(&blob, "pw").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_decrypt_object_rejects_non_json() {
        let helper = EncryptionHelper::with_iterations(1_000);
        let blob = helper.encrypt(b"not json", "pw").unwrap();
        let result: Result<Secret> = helper.decrypt_object(&blob, "pw");
        assert!(matches!(result, Err(CryptoError::MalformedPayload(_))));
    }

    #[test]
    fn test_generate_password() {
        let password = generate_password(32);
        assert_eq!(password.chars().count(), 32);
        assert!(password.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
        assert_eq!(generate_password(0), "");
        assert_ne!(generate_password(32), generate_password(32));
    }

    #[test]
    fn test_default_password_length() {
        let password = generate_default_password();
        assert_eq!(password.len(), DEFAULT_PASSWORD_LEN);
        assert_eq!(DEFAULT_PASSWORD_LEN, 32);
        assert!(password.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash(b"key"), hash(b"key"));
        assert_ne!(hash(b"key1"), hash(b"key2"));
    }
}
