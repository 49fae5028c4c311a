//! 应用配置和持久化
//!
//! 提供设备名称、监听端口、下载目录等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogLevel;

/// 默认传输端口
pub const DEFAULT_PORT: u16 = 5001;

/// 默认无活动超时（秒）
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 60;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（在发现列表中显示）
    pub device_name: String,
    /// 接收端监听端口
    pub port: u16,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 是否自动接受传输
    pub auto_accept: bool,
    /// 日志级别
    pub log_level: LogLevel,
    /// 连接无活动超时（秒）
    pub inactivity_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            port: DEFAULT_PORT,
            download_dir: dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
                .unwrap_or_else(|| PathBuf::from(".")),
            auto_accept: false,
            log_level: LogLevel::Info,
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neardrop");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定路径加载设置
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// 保存设置到指定路径
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

/// 获取默认设备名称（主机名）
pub fn default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "NearDrop".to_string())
}

/// 在目录中为文件名挑选一个未被占用的保存路径
///
/// `report.pdf` 已存在时依次尝试 `report (1).pdf`、`report (2).pdf`……
pub fn unique_save_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
