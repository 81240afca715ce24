//! 应用配置和持久化
//!
//! 提供目标设备、扫描超时、输出目录等设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ble::{DEFAULT_CHUNK_SIZE, DEFAULT_DEVICE_ADDRESS, DEFAULT_DEVICE_NAME, DeviceFilter};
use crate::transfer::DEFAULT_FILE_PREFIX;

/// 接收设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// 设备名称片段
    pub device_name: Option<String>,
    /// 设备地址或外设标识（精确匹配），设为空字符串表示不按地址匹配
    pub device_address: Option<String>,
    /// 扫描时长（秒）
    pub scan_timeout_secs: u64,
    /// 标称块大小
    pub chunk_size: usize,
    /// START 确认后的额外等待（毫秒）
    pub settle_delay_ms: u64,
    /// 单次特征读写超时（秒），不设置则不限时
    pub io_timeout_secs: Option<u64>,
    /// 保存目录
    pub output_dir: PathBuf,
    /// 保存文件名前缀
    pub file_prefix: String,
    /// 持续监听：两次成功之间的间隔（秒）
    pub monitor_interval_secs: u64,
    /// 持续监听：失败退避上限（秒）
    pub monitor_max_backoff_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            device_name: Some(DEFAULT_DEVICE_NAME.to_string()),
            device_address: Some(DEFAULT_DEVICE_ADDRESS.to_string()),
            scan_timeout_secs: 5,
            chunk_size: DEFAULT_CHUNK_SIZE,
            settle_delay_ms: 0,
            io_timeout_secs: None,
            output_dir: PathBuf::from("."),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            monitor_interval_secs: 10,
            monitor_max_backoff_secs: 300,
        }
    }
}

impl FetchSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vrble");
        config_dir.join("settings.toml")
    }

    /// 从默认路径加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

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

    /// 保存设置到默认路径
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.device_name.clone(), self.device_address.clone())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn monitor_max_backoff(&self) -> Duration {
        Duration::from_secs(self.monitor_max_backoff_secs)
    }
}
