//! 提醒展示接口 - 新通知在平台层的呈现

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::event::{Notification, NotificationKind};

/// 新合并通知对应的提醒内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

impl Alert {
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::Unknown,
        }
    }
}

impl From<&Notification> for Alert {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            title: n.title.clone(),
            message: n.message.clone(),
            kind: n.kind,
        }
    }
}

/// 单条提醒的展示结果
#[derive(Debug, Clone, PartialEq)]
pub enum PresentResult {
    Shown,
    /// 未展示（dry-run 或被过滤）
    Skipped(String),
    Failed(String),
}

/// 提醒展示器
pub trait AlertPresenter: Send + Sync {
    /// 展示器名称（用于日志）
    fn name(&self) -> &str;

    fn present(&self, alert: &Alert) -> Result<PresentResult>;

    /// 撤下此展示器当前显示的所有提醒
    fn dismiss_all(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::event::NotificationPayload;

    #[test]
    fn test_alert_from_notification() {
        let n = Notification::new(
            "new_booking_b1_1",
            NotificationKind::NewBooking,
            "Table for 2",
            NotificationPayload::booking("b1"),
            1_000,
        );
        let alert = Alert::from(&n);
        assert_eq!(alert.id, "new_booking_b1_1");
        assert_eq!(alert.title, "New booking");
        assert_eq!(alert.message, "Table for 2");
        assert_eq!(alert.kind, NotificationKind::NewBooking);
    }
}
