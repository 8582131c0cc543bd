// Settings 配置数据结构

use serde::{Deserialize, Serialize};

use crate::ssh::config::HostKeyPolicy;

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub theme: ThemeMode,
    pub terminal: TerminalSettings,
    pub connection: ConnectionSettings,
    pub security: SecuritySettings,
    pub ui: UiSettings,
    /// 默认连接配置
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

// ======================== 终端设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CursorStyle {
    #[default]
    Block,
    Underline,
    Bar,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub font_size: u32,
    pub font_family: String,
    pub cursor_style: CursorStyle,
    pub cursor_blink: bool,
    pub scrollback: u32,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            font_size: 14,
            font_family: "Courier New, monospace".to_string(),
            cursor_style: CursorStyle::Block,
            cursor_blink: true,
            scrollback: 1000,
        }
    }
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connection_timeout_secs: u32,
    pub keepalive_interval_secs: u32,
    pub default_port: u16,
    pub auto_reconnect: bool,
    pub reconnect_initial_delay_secs: u32,
    pub reconnect_max_delay_secs: u32,
    pub max_concurrent_commands: u32,
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 15,
            keepalive_interval_secs: 60,
            default_port: 22,
            auto_reconnect: true,
            reconnect_initial_delay_secs: 5,
            reconnect_max_delay_secs: 30,
            max_concurrent_commands: 4,
            host_key_policy: HostKeyPolicy::AcceptNew,
        }
    }
}

// ======================== 安全设置 ========================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub biometric_auth_enabled: bool,
    /// 自动锁定（分钟），0 表示关闭
    pub auto_lock_timeout_mins: u32,
    pub require_auth_on_resume: bool,
}

// ======================== 界面设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub show_welcome_screen: bool,
    pub default_tab: String,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            show_welcome_screen: true,
            default_tab: "terminal".to_string(),
        }
    }
}
