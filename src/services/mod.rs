// 服务层：本地存储与各类数据管理

pub mod keys;
pub mod known_hosts;
pub mod profiles;
pub mod settings;
pub mod storage;

pub use keys::KeyManager;
pub use known_hosts::KnownHostsStore;
pub use profiles::{validate, ProfileStore, ValidationError};
pub use settings::SettingsService;
pub use storage::{default_data_dir, StorageBackend, StorageKind};
