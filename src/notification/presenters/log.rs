//! 日志展示器 - 提醒输出到 tracing 日志

use anyhow::Result;
use tracing::info;

use crate::notification::presenter::{Alert, AlertPresenter, PresentResult};

pub struct LogPresenter;

impl LogPresenter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertPresenter for LogPresenter {
    fn name(&self) -> &str {
        "log"
    }

    fn present(&self, alert: &Alert) -> Result<PresentResult> {
        info!(id = %alert.id, kind = %alert.kind, title = %alert.title, "🔔 {}", alert.message);
        Ok(PresentResult::Shown)
    }

    fn dismiss_all(&self) -> Result<()> {
        info!("Alerts dismissed");
        Ok(())
    }
}
