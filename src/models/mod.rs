// 数据模型模块

pub mod key_pair;
pub mod known_hosts;
pub mod profile;
pub mod settings;

pub use key_pair::KeyPair;
pub use known_hosts::{KnownHost, KnownHostsConfig};
pub use profile::{AuthType, ConnectionProfile, ProfileDraft, ProfileExport};
pub use settings::{AppSettings, ConnectionSettings};
