//! 流消费者 - 用推送通道的数据驱动存储

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::classifier::{classify, Classified};
use super::store::{MergeOutcome, StoreHandle};
use crate::infra::push::{ConnectionState, PushChannel};

/// 单个原始帧的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 与上一帧相同，不再分类
    Retransmission,
    Ignored,
    Unknown,
    Merged(MergeOutcome),
    /// 存储已关闭
    Dropped,
}

/// 消费 [`PushChannel`] 的消息流和连接状态流
pub struct StreamConsumer {
    store: StoreHandle,
    connection: watch::Sender<ConnectionState>,
    last_frame: Option<u64>,
}

impl StreamConsumer {
    pub fn new(store: StoreHandle, connection: watch::Sender<ConnectionState>) -> Self {
        Self {
            store,
            connection,
            last_frame: None,
        }
    }

    /// 订阅通道并持续处理，直到 `shutdown` 置位（或发送端被释放）或两路数据都关闭
    ///
    /// 响应关闭前先处理完已到达的帧。
    pub fn spawn(
        mut self,
        channel: &dyn PushChannel,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut messages = channel.messages();
        let mut states = channel.connection_state();

        tokio::spawn(async move {
            let initial = *states.borrow_and_update();
            self.connection.send_replace(initial);
            info!(state = %initial, "Stream consumer started");

            let mut messages_open = true;
            let mut states_open = true;

            while messages_open || states_open {
                tokio::select! {
                    biased;
                    frame = messages.recv(), if messages_open => match frame {
                        Ok(raw) => {
                            self.handle_frame(&raw).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Push message feed lagged, frames skipped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Push message feed closed");
                            messages_open = false;
                        }
                    },
                    changed = states.changed(), if states_open => match changed {
                        Ok(()) => {
                            let state = *states.borrow_and_update();
                            debug!(state = %state, "Connection state changed");
                            self.connection.send_replace(state);
                        }
                        Err(_) => {
                            debug!("Connection state feed closed");
                            states_open = false;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Stream consumer stopped");
        })
    }

    /// 分类单个原始帧，识别为事件时合并进存储
    pub async fn handle_frame(&mut self, raw: &str) -> FrameOutcome {
        let fingerprint = fingerprint(raw);
        if self.last_frame == Some(fingerprint) {
            debug!("Retransmitted frame skipped");
            return FrameOutcome::Retransmission;
        }
        self.last_frame = Some(fingerprint);

        match classify(raw) {
            Classified::Event(notification) => match self.store.merge(notification).await {
                Ok(outcome) => FrameOutcome::Merged(outcome),
                Err(e) => {
                    warn!(error = %e, "Could not merge notification");
                    FrameOutcome::Dropped
                }
            },
            Classified::Ignored(_) => FrameOutcome::Ignored,
            Classified::Unknown(tag) => {
                info!(tag = %tag, "Unhandled push message type");
                FrameOutcome::Unknown
            }
        }
    }
}

fn fingerprint(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::slot::MemorySlot;
    use crate::notification::dispatcher::AlertDispatcher;
    use crate::notification::store::{NotificationStore, StoreOptions};
    use std::sync::Arc;

    fn spawn_store() -> NotificationStore {
        NotificationStore::spawn(
            Arc::new(MemorySlot::new()),
            Arc::new(AlertDispatcher::new()),
            StoreOptions::default(),
        )
    }

    const BOOKING: &str = r#"{"type":"new_booking","payload":{"bookingId":"b1","timestamp":1700000000}}"#;

    #[tokio::test]
    async fn test_retransmitted_frame_is_skipped() {
        let store = spawn_store();
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let mut consumer = StreamConsumer::new(store.handle(), connection);

        assert_eq!(
            consumer.handle_frame(BOOKING).await,
            FrameOutcome::Merged(MergeOutcome::Inserted)
        );
        assert_eq!(consumer.handle_frame(BOOKING).await, FrameOutcome::Retransmission);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_adjacent_redelivery_hits_store_dedup() {
        let store = spawn_store();
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let mut consumer = StreamConsumer::new(store.handle(), connection);

        consumer.handle_frame(BOOKING).await;
        assert_eq!(consumer.handle_frame(r#"{"type":"ping"}"#).await, FrameOutcome::Ignored);
        assert_eq!(
            consumer.handle_frame(BOOKING).await,
            FrameOutcome::Merged(MergeOutcome::Duplicate)
        );
        assert_eq!(store.snapshot().len(), 1);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_frames() {
        let store = spawn_store();
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let mut consumer = StreamConsumer::new(store.handle(), connection);

        assert_eq!(consumer.handle_frame(r#"{"type":"menu_changed"}"#).await, FrameOutcome::Unknown);
        assert_eq!(consumer.handle_frame("{oops").await, FrameOutcome::Ignored);
        assert!(store.snapshot().is_empty());
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_frame_after_store_shutdown_is_dropped() {
        let store = spawn_store();
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let mut consumer = StreamConsumer::new(store.handle(), connection);
        store.shutdown().await;

        assert_eq!(consumer.handle_frame(BOOKING).await, FrameOutcome::Dropped);
    }
}
