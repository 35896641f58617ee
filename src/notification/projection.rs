//! 历史的派生只读视图
//!
//! 存储在每次变更后重新计算，并通过 `watch` 通道推送；观察者数量不限。

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::event::{Notification, NotificationKind};

/// 已发布的历史，带产生它的版本号
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub revision: u64,
    /// 按时间从新到旧
    pub entries: Arc<Vec<Notification>>,
}

/// 历史统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
    pub by_kind: BTreeMap<NotificationKind, usize>,
    pub newest_at_millis: Option<i64>,
}

impl NotificationStats {
    pub fn from_entries(entries: &[Notification]) -> Self {
        let mut by_kind = BTreeMap::new();
        for n in entries {
            *by_kind.entry(n.kind).or_insert(0) += 1;
        }
        Self {
            total: entries.len(),
            unread: unread_count(entries),
            by_kind,
            newest_at_millis: entries.iter().map(|n| n.created_at_millis).max(),
        }
    }
}

pub fn unread_count(entries: &[Notification]) -> usize {
    entries.iter().filter(|n| !n.is_read).count()
}

/// 发送端，由存储任务持有
pub(crate) struct ProjectionPublisher {
    history: watch::Sender<HistorySnapshot>,
    unread: watch::Sender<usize>,
    stats: watch::Sender<NotificationStats>,
}

impl ProjectionPublisher {
    pub(crate) fn new() -> (Self, Projections) {
        let (history, history_rx) = watch::channel(HistorySnapshot::default());
        let (unread, unread_rx) = watch::channel(0);
        let (stats, stats_rx) = watch::channel(NotificationStats::default());
        (
            Self { history, unread, stats },
            Projections {
                history: history_rx,
                unread: unread_rx,
                stats: stats_rx,
            },
        )
    }

    /// 发布新版本的历史并刷新派生值
    ///
    /// 派生通道只在值真正变化时通知
    pub(crate) fn publish(&self, revision: u64, entries: Vec<Notification>) {
        let unread = unread_count(&entries);
        let stats = NotificationStats::from_entries(&entries);
        self.history.send_replace(HistorySnapshot {
            revision,
            entries: Arc::new(entries),
        });
        self.unread.send_if_modified(|current| {
            if *current == unread {
                return false;
            }
            *current = unread;
            true
        });
        self.stats.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
    }

    pub(crate) fn subscribe_history(&self) -> watch::Receiver<HistorySnapshot> {
        self.history.subscribe()
    }
}

/// 接收端，可廉价克隆
#[derive(Debug, Clone)]
pub struct Projections {
    history: watch::Receiver<HistorySnapshot>,
    unread: watch::Receiver<usize>,
    stats: watch::Receiver<NotificationStats>,
}

impl Projections {
    pub fn history(&self) -> watch::Receiver<HistorySnapshot> {
        self.history.clone()
    }

    pub fn unread_count(&self) -> watch::Receiver<usize> {
        self.unread.clone()
    }

    pub fn stats(&self) -> watch::Receiver<NotificationStats> {
        self.stats.clone()
    }

    /// 当前历史，按时间从新到旧
    pub fn current(&self) -> Arc<Vec<Notification>> {
        self.history.borrow().entries.clone()
    }

    pub fn current_unread(&self) -> usize {
        *self.unread.borrow()
    }

    pub fn current_stats(&self) -> NotificationStats {
        self.stats.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::event::NotificationPayload;

    fn entry(id: &str, kind: NotificationKind, ts: i64, read: bool) -> Notification {
        let mut n = Notification::new(id, kind, "m", NotificationPayload::default(), ts);
        n.is_read = read;
        n
    }

    #[test]
    fn test_stats_from_entries() {
        let entries = vec![
            entry("c", NotificationKind::TestNotification, 30, false),
            entry("b", NotificationKind::NewBooking, 20, true),
            entry("a", NotificationKind::NewBooking, 10, false),
        ];
        let stats = NotificationStats::from_entries(&entries);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 2);
        assert_eq!(stats.by_kind[&NotificationKind::NewBooking], 2);
        assert_eq!(stats.newest_at_millis, Some(30));
    }

    #[tokio::test]
    async fn test_unread_only_notifies_on_change() {
        let (publisher, projections) = ProjectionPublisher::new();
        let mut unread = projections.unread_count();
        let mut other = projections.unread_count();

        publisher.publish(1, vec![entry("a", NotificationKind::NewBooking, 1, false)]);
        assert!(unread.has_changed().unwrap());
        assert_eq!(*unread.borrow_and_update(), 1);
        assert_eq!(*other.borrow_and_update(), 1);

        // same unread count, different history
        publisher.publish(
            2,
            vec![
                entry("b", NotificationKind::NewBooking, 2, true),
                entry("a", NotificationKind::NewBooking, 1, false),
            ],
        );
        assert!(!unread.has_changed().unwrap());
        assert_eq!(projections.history().borrow().revision, 2);
        assert_eq!(projections.current().len(), 2);
    }
}
