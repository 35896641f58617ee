//! 历史快照的后台持久化
//!
//! 跟随存储的历史 watch 通道，把新快照写入持久槽。`watch` 只保留最新值，
//! 写入进行中时的后续变更会合并为一次携带最新状态的写入。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::codec;
use super::projection::HistorySnapshot;
use crate::infra::slot::DurableSlot;

pub(crate) struct Persister {
    slot: Arc<dyn DurableSlot>,
    snapshots: watch::Receiver<HistorySnapshot>,
    /// 最近一次尝试写入的版本号
    persisted: watch::Sender<u64>,
    saving: Arc<AtomicBool>,
}

impl Persister {
    pub(crate) fn new(
        slot: Arc<dyn DurableSlot>,
        snapshots: watch::Receiver<HistorySnapshot>,
        persisted: watch::Sender<u64>,
        saving: Arc<AtomicBool>,
    ) -> Self {
        Self {
            slot,
            snapshots,
            persisted,
            saving,
        }
    }

    /// 运行到存储释放历史发送端为止，退出前总会写入最后一个快照
    pub(crate) fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while self.snapshots.changed().await.is_ok() {
                let snapshot = self.snapshots.borrow_and_update().clone();
                self.write(&snapshot).await;
                self.persisted.send_replace(snapshot.revision);
            }
            debug!("Persister stopped");
        })
    }

    async fn write(&self, snapshot: &HistorySnapshot) {
        let encoded = match codec::encode(&snapshot.entries) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(revision = snapshot.revision, error = %e, "Failed to encode notification history");
                return;
            }
        };

        self.saving.store(true, Ordering::SeqCst);
        let slot = self.slot.clone();
        let result = tokio::task::spawn_blocking(move || slot.write(&encoded)).await;
        self.saving.store(false, Ordering::SeqCst);

        match result {
            Ok(Ok(())) => debug!(
                revision = snapshot.revision,
                entries = snapshot.entries.len(),
                "Notification history persisted"
            ),
            Ok(Err(e)) => warn!(revision = snapshot.revision, error = %e, "Failed to persist notification history"),
            Err(e) => warn!(revision = snapshot.revision, error = %e, "Persist task panicked"),
        }
    }
}
