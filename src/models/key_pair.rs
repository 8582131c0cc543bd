// SSH 密钥对数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 已保存的密钥对
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// 密钥名称（同时作为 key_id）
    pub name: String,
    /// OpenSSH 公钥行
    pub public_key: String,
    /// OpenSSH 私钥 (PEM)
    pub private_key: String,
    /// SHA256 指纹
    pub fingerprint: String,
    /// 私钥密码（如果有）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
