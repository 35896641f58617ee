//! 提醒分发器 - 把提醒分发给所有已注册的展示器

use super::presenter::{Alert, AlertPresenter, PresentResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 提醒分发器，单个展示器失败不影响其他展示器
pub struct AlertDispatcher {
    presenters: Vec<Arc<dyn AlertPresenter>>,
    dry_run: bool,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self {
            presenters: Vec::new(),
            dry_run: false,
        }
    }

    /// 设置 dry-run 模式（只记录日志）
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn register(&mut self, presenter: Arc<dyn AlertPresenter>) {
        info!(presenter = presenter.name(), "Registering alert presenter");
        self.presenters.push(presenter);
    }

    /// 注册展示器（链式）
    pub fn with_presenter(mut self, presenter: Arc<dyn AlertPresenter>) -> Self {
        self.register(presenter);
        self
    }

    /// 交给每个展示器展示，并收集各自的结果
    pub fn present(&self, alert: &Alert) -> Vec<(String, PresentResult)> {
        let mut results = Vec::with_capacity(self.presenters.len());

        for presenter in &self.presenters {
            let name = presenter.name().to_string();

            if self.dry_run {
                info!(presenter = %name, id = %alert.id, title = %alert.title, "[DRY-RUN] alert");
                results.push((name, PresentResult::Skipped("dry-run".to_string())));
                continue;
            }

            let result = match presenter.present(alert) {
                Ok(r) => r,
                Err(e) => {
                    warn!(presenter = %name, error = %e, "Presenter failed");
                    PresentResult::Failed(e.to_string())
                }
            };
            debug!(presenter = %name, id = %alert.id, result = ?result, "Alert presented");
            results.push((name, result));
        }

        results
    }

    pub fn dismiss_all(&self) {
        if self.dry_run {
            info!("[DRY-RUN] dismiss all alerts");
            return;
        }
        for presenter in &self.presenters {
            if let Err(e) = presenter.dismiss_all() {
                warn!(presenter = presenter.name(), error = %e, "Dismiss failed");
            }
        }
    }

    pub fn presenter_count(&self) -> usize {
        self.presenters.len()
    }

    pub fn presenter_names(&self) -> Vec<&str> {
        self.presenters.iter().map(|p| p.name()).collect()
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
