//! 配置文件
//!
//! JSON 设置文件，包含页面颜色、服务器参数和阈值表。

use crate::sampler::{DEFAULT_INTERFACE, DEFAULT_TEMPERATURE_SENSOR, SamplerOptions};
use crate::threshold::{DEFAULT_COLOR, ThresholdTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BACKGROUND_COLOR: &str = "#E8E8E8";
pub const DEFAULT_EXT_HDD_PATH: &str = "/mnt/ext_hdd/";
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// 完整设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Page", default)]
    pub page: PageSettings,
    #[serde(rename = "Server", default)]
    pub server: ServerSettings,
    #[serde(rename = "Colormap", default)]
    pub colormap: ThresholdTable,
}

/// 页面颜色
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSettings {
    #[serde(rename = "background-color", default = "default_background_color")]
    pub background_color: String,
    /// 不可用指标使用的中性色
    #[serde(rename = "default-color", default = "default_color")]
    pub default_color: String,
}

fn default_background_color() -> String {
    DEFAULT_BACKGROUND_COLOR.to_string()
}
fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            background_color: default_background_color(),
            default_color: default_color(),
        }
    }
}

/// 服务器与探针参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_ext_hdd_path")]
    pub external_hdd_path: String,
    #[serde(default = "default_interface")]
    pub network_interface: String,
    #[serde(default = "default_temperature_sensor")]
    pub temperature_sensor: String,
    /// 仅在启动时读取
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_ext_hdd_path() -> String {
    DEFAULT_EXT_HDD_PATH.to_string()
}
fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}
fn default_temperature_sensor() -> String {
    DEFAULT_TEMPERATURE_SENSOR.to_string()
}
fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            external_hdd_path: default_ext_hdd_path(),
            network_interface: default_interface(),
            temperature_sensor: default_temperature_sensor(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ServerSettings {
    /// 构建服务器地址
    pub fn address(&self) -> Result<SocketAddr> {
        // IPv6 地址需要方括号
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let addr = if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        };
        addr.parse()
            .with_context(|| format!("无效的地址格式: {addr}"))
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Settings {
    /// 从文件加载设置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取设置文件 {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("设置文件 {} 格式错误", path.display()))
    }

    /// 从 JSON 文本解析设置
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// 采样器使用的参数
    pub fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions {
            network_interface: self.server.network_interface.clone(),
            temperature_sensor: self.server.temperature_sensor.clone(),
            neutral_color: self.page.default_color.clone(),
        }
    }
}
