// SSH 连接配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::settings::ConnectionSettings;

/// 单次连接的目标配置
///
/// 不包含认证信息：凭据由 CredentialResolver 在每次连接时重新解析。
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 连接超时（秒）
    pub connect_timeout: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            connect_timeout: 15,
        }
    }
}

impl SshConfig {
    /// host:port 形式的地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 心跳由 SessionManager 自己调度，这里不启用 russh 的空闲超时
        config.inactivity_timeout = None;
        config.keepalive_interval = None;
        config
    }
}

/// 主机密钥策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// 只接受已记录的主机
    Strict,
    /// 首次连接时记录新主机（TOFU）
    #[default]
    AcceptNew,
}

/// Shell 选项（未指定的字段使用默认值）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellOptions {
    pub rows: Option<u32>,
    pub cols: Option<u32>,
    pub term: Option<String>,
}

/// 重连退避配置
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// 是否在意外断开后自动重连
    pub enabled: bool,
    /// 首次等待
    pub initial_delay: Duration,
    /// 最大等待
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// SessionManager 的运行策略
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// TCP 连接超时（秒）
    pub connect_timeout: u64,
    /// 心跳间隔
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// 同时执行的命令通道上限，超过时排队等待
    pub max_concurrent_commands: usize,
    /// 每个数据订阅者的缓冲块数
    pub data_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 15,
            keepalive_interval: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
            max_concurrent_commands: 4,
            data_buffer: 256,
        }
    }
}

impl SessionConfig {
    /// 从应用设置构建
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self {
            connect_timeout: settings.connection_timeout_secs.max(1) as u64,
            keepalive_interval: Duration::from_secs(settings.keepalive_interval_secs.max(1) as u64),
            reconnect: ReconnectConfig {
                enabled: settings.auto_reconnect,
                initial_delay: Duration::from_secs(settings.reconnect_initial_delay_secs as u64),
                max_delay: Duration::from_secs(settings.reconnect_max_delay_secs as u64),
            },
            max_concurrent_commands: settings.max_concurrent_commands.max(1) as usize,
            ..Self::default()
        }
    }
}
