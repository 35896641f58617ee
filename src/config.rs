//! 引擎配置
//!
//! 从 `$VNOTIFY_CONFIG` 或 `<config_dir>/venue-notify/config.json` 加载。
//! 所有字段都有默认值，文件缺失或不完整均可。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 默认历史容量
pub const DEFAULT_CAPACITY: usize = 50;
/// 默认保留天数
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

const CONFIG_ENV: &str = "VNOTIFY_CONFIG";

/// 天数转时长，溢出时取最大值
pub fn days_to_duration(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// 最多保留的通知数
    pub capacity: usize,
    /// 超过此天数的通知会被清理
    pub retention_days: u64,
    /// 持久化历史文件
    pub storage_path: PathBuf,
    /// JSONL 提醒托盘；`None` 时不启用文件展示器
    pub alert_log_path: Option<PathBuf>,
    /// 启动时订阅的频道
    pub default_channel: String,
    /// 推送消息流的缓冲大小
    pub message_buffer: usize,
    /// 只记录提醒日志，不实际展示
    pub dry_run: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        let dir = Self::config_dir();
        Self {
            capacity: DEFAULT_CAPACITY,
            retention_days: DEFAULT_RETENTION_DAYS,
            storage_path: dir.join("notifications.json"),
            alert_log_path: Some(dir.join("alerts.jsonl")),
            default_channel: "bookings".to_string(),
            message_buffer: 256,
            dry_run: false,
        }
    }
}

impl NotifyConfig {
    /// `<config_dir>/venue-notify`，取不到时回退到 `./.config/venue-notify`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(".config"))
            .join("venue-notify")
    }

    /// 从环境变量指定路径或默认路径加载；文件不存在时使用默认值
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("config.json"));
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NotifyConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn retention_days(mut self, days: u64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn alert_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.alert_log_path = path;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// 容量，至少为 1
    pub fn effective_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    pub fn retention(&self) -> Duration {
        days_to_duration(self.retention_days)
    }

    pub fn retention_millis(&self) -> i64 {
        i64::try_from(self.retention().as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NotifyConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.retention_millis(), 7 * 24 * 60 * 60 * 1000);
        assert!(config.storage_path.ends_with("venue-notify/notifications.json"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"capacity": 10, "dry_run": true}"#).unwrap();

        let config = NotifyConfig::load_from(&path).unwrap();
        assert_eq!(config.capacity, 10);
        assert!(config.dry_run);
        assert_eq!(config.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.default_channel, "bookings");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(NotifyConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_huge_day_counts_saturate() {
        assert_eq!(days_to_duration(u64::MAX), Duration::from_secs(u64::MAX));
        assert_eq!(days_to_duration(2), Duration::from_secs(2 * 86_400));
        assert_eq!(NotifyConfig::default().retention_days(u64::MAX).retention_millis(), i64::MAX);
    }

    #[test]
    fn test_capacity_clamped() {
        assert_eq!(NotifyConfig::default().capacity(0).effective_capacity(), 1);
    }
}
