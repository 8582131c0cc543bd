// 连接配置管理

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::info;

use super::storage::StorageBackend;
use crate::models::{AuthType, ConnectionProfile, ProfileDraft, ProfileExport};
use crate::ssh::credential::ProfileProvider;

const PROFILES_KEY: &str = "connection_profiles";
const MAX_NAME_LEN: usize = 50;
/// 最近使用列表的默认长度
pub const RECENT_LIMIT: usize = 5;

/// 校验错误
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// 校验连接配置
pub fn validate(draft: &ProfileDraft) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let name = draft.name.trim();
    if name.is_empty() {
        errors.push(ValidationError::new("name", "Name is required"));
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(ValidationError::new(
            "name",
            format!("Name must be at most {} characters", MAX_NAME_LEN),
        ));
    }

    let host = draft.host.trim();
    if host.is_empty() {
        errors.push(ValidationError::new("host", "Host is required"));
    } else if !is_valid_host(host) {
        errors.push(ValidationError::new(
            "host",
            "Host must be a valid IPv4 address or hostname",
        ));
    }

    if draft.port == 0 {
        errors.push(ValidationError::new("port", "Port must be between 1 and 65535"));
    }

    if draft.username.trim().is_empty() {
        errors.push(ValidationError::new("username", "Username is required"));
    }

    match draft.auth_type {
        AuthType::Key => {
            if draft.key_id.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new("key_id", "Key is required for key authentication"));
            }
        }
        AuthType::Password => {
            if draft.password.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "password",
                    "Password is required for password authentication",
                ));
            }
        }
    }

    errors
}

/// IPv4 地址或 RFC 1123 主机名
fn is_valid_host(host: &str) -> bool {
    let looks_numeric = host.chars().all(|c| c.is_ascii_digit() || c == '.');
    if looks_numeric {
        return host.parse::<Ipv4Addr>().is_ok();
    }
    if host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn generate_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("profile_{}_{}", Utc::now().timestamp_millis(), suffix)
}

fn ensure_valid(draft: &ProfileDraft) -> Result<()> {
    let errors = validate(draft);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid profile: {}", messages.join("; "));
    }
    Ok(())
}

/// 连接配置存储
#[derive(Clone)]
pub struct ProfileStore {
    storage: Arc<StorageBackend>,
}

impl ProfileStore {
    pub fn new(storage: Arc<StorageBackend>) -> Self {
        Self { storage }
    }

    pub fn all(&self) -> Result<Vec<ConnectionProfile>> {
        Ok(self.storage.get(PROFILES_KEY)?.unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        Ok(self.all()?.into_iter().find(|p| p.id == id))
    }

    /// 新建配置
    pub fn create(&self, draft: ProfileDraft) -> Result<ConnectionProfile> {
        ensure_valid(&draft)?;
        let now = Utc::now();
        let profile = ConnectionProfile {
            id: generate_id(),
            name: draft.name.trim().to_string(),
            host: draft.host.trim().to_string(),
            port: draft.port,
            username: draft.username.trim().to_string(),
            key_id: draft.key_id,
            password: draft.password,
            auth_type: draft.auth_type,
            last_used: None,
            created_at: now,
            updated_at: now,
        };

        self.storage
            .update(PROFILES_KEY, |profiles: &mut Vec<ConnectionProfile>| {
                profiles.push(profile.clone());
                Ok(())
            })
            .context("无法保存连接配置")?;
        info!("[Profiles] Created profile {} ({})", profile.name, profile.id);
        Ok(profile)
    }

    /// 更新配置
    pub fn update(&self, id: &str, draft: ProfileDraft) -> Result<ConnectionProfile> {
        ensure_valid(&draft)?;
        self.storage
            .update(PROFILES_KEY, |profiles: &mut Vec<ConnectionProfile>| {
                let profile = profiles
                    .iter_mut()
                    .find(|p| p.id == id)
                    .with_context(|| format!("Profile not found: {}", id))?;
                profile.name = draft.name.trim().to_string();
                profile.host = draft.host.trim().to_string();
                profile.port = draft.port;
                profile.username = draft.username.trim().to_string();
                profile.key_id = draft.key_id;
                profile.password = draft.password;
                profile.auth_type = draft.auth_type;
                profile.updated_at = Utc::now();
                Ok(profile.clone())
            })
    }

    /// 删除配置，返回是否存在
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.storage
            .update(PROFILES_KEY, |profiles: &mut Vec<ConnectionProfile>| {
                let before = profiles.len();
                profiles.retain(|p| p.id != id);
                Ok(profiles.len() != before)
            })
    }

    /// 记录最近使用时间
    pub fn mark_as_used(&self, id: &str) -> Result<()> {
        self.storage
            .update(PROFILES_KEY, |profiles: &mut Vec<ConnectionProfile>| {
                if let Some(profile) = profiles.iter_mut().find(|p| p.id == id) {
                    profile.last_used = Some(Utc::now());
                }
                Ok(())
            })
    }

    /// 最近使用的配置，按使用时间倒序
    pub fn recent(&self, limit: usize) -> Result<Vec<ConnectionProfile>> {
        let mut used: Vec<_> = self
            .all()?
            .into_iter()
            .filter(|p| p.last_used.is_some())
            .collect();
        used.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        used.truncate(limit);
        Ok(used)
    }

    /// 复制配置
    pub fn duplicate(&self, id: &str, new_name: Option<&str>) -> Result<ConnectionProfile> {
        let source = self
            .get(id)?
            .with_context(|| format!("Profile not found: {}", id))?;
        let mut draft = ProfileDraft::from_profile(&source);
        draft.name = match new_name {
            Some(name) => name.to_string(),
            None => format!("{} (Copy)", source.name),
        };
        self.create(draft)
    }

    /// 导出为 JSON（不含密码和密钥引用）
    pub fn export(&self, id: &str) -> Result<String> {
        let profile = self
            .get(id)?
            .with_context(|| format!("Profile not found: {}", id))?;
        let export = ProfileExport {
            name: profile.name,
            host: profile.host,
            port: profile.port,
            username: profile.username,
            auth_type: profile.auth_type,
        };
        serde_json::to_string_pretty(&export).context("无法序列化连接配置")
    }

    /// 导入 JSON，凭据需要在导入后补全
    ///
    /// 导入的配置不含凭据，校验失败的项会保存为需要补全的配置。
    pub fn import(&self, json: &str) -> Result<ConnectionProfile> {
        let export: ProfileExport = serde_json::from_str(json).context("无法解析导入的连接配置")?;
        let draft = ProfileDraft {
            name: export.name,
            host: export.host,
            port: export.port,
            username: export.username,
            key_id: None,
            password: None,
            auth_type: export.auth_type,
        };

        let blocking: Vec<String> = validate(&draft)
            .into_iter()
            .filter(|e| e.field != "key_id" && e.field != "password")
            .map(|e| e.to_string())
            .collect();
        if !blocking.is_empty() {
            bail!("Invalid profile: {}", blocking.join("; "));
        }

        let now = Utc::now();
        let profile = ConnectionProfile {
            id: generate_id(),
            name: draft.name,
            host: draft.host,
            port: draft.port,
            username: draft.username,
            key_id: None,
            password: None,
            auth_type: draft.auth_type,
            last_used: None,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .update(PROFILES_KEY, |profiles: &mut Vec<ConnectionProfile>| {
                profiles.push(profile.clone());
                Ok(())
            })?;
        info!("[Profiles] Imported profile {} ({})", profile.name, profile.id);
        Ok(profile)
    }
}

#[async_trait]
impl ProfileProvider for ProfileStore {
    // 存储读写（以及加密后端的密钥派生）放到阻塞线程池
    async fn get_profile(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.get(&id))
            .await
            .context("Profile lookup task failed")?
    }

    async fn mark_as_used(&self, id: &str) -> Result<()> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || ProfileStore::mark_as_used(&store, &id))
            .await
            .context("Profile update task failed")?
    }
}
