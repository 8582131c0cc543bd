// 应用设置持久化

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::storage::StorageBackend;
use crate::models::AppSettings;

const SETTINGS_KEY: &str = "app_settings";

/// 设置服务
#[derive(Clone)]
pub struct SettingsService {
    storage: Arc<StorageBackend>,
}

impl SettingsService {
    pub fn new(storage: Arc<StorageBackend>) -> Self {
        Self { storage }
    }

    /// 加载设置，未保存过时返回默认值
    pub fn get(&self) -> Result<AppSettings> {
        Ok(self
            .storage
            .get(SETTINGS_KEY)
            .context("无法加载应用设置")?
            .unwrap_or_default())
    }

    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        self.storage
            .set(SETTINGS_KEY, settings)
            .context("无法保存应用设置")
    }

    /// 修改部分设置并保存
    pub fn update(&self, f: impl FnOnce(&mut AppSettings)) -> Result<AppSettings> {
        self.storage.update(SETTINGS_KEY, |settings: &mut AppSettings| {
            f(settings);
            Ok(settings.clone())
        })
    }

    /// 恢复默认设置
    pub fn reset(&self) -> Result<AppSettings> {
        let defaults = AppSettings::default();
        self.save(&defaults)?;
        info!("[Settings] Reset to defaults");
        Ok(defaults)
    }
}
