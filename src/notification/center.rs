//! 通知中心 - 提供给 UI 层的命令接口
//!
//! 持有一个会话的存储、流消费者和推送通道。

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::consumer::StreamConsumer;
use super::dispatcher::AlertDispatcher;
use super::event::Notification;
use super::projection::{HistorySnapshot, NotificationStats};
use super::store::{LoadOutcome, NotificationStore, StoreHandle, StoreOptions};
use crate::infra::push::{ConnectionState, PushChannel};
use crate::infra::slot::DurableSlot;

pub struct NotificationCenter {
    store: NotificationStore,
    channel: Arc<dyn PushChannel>,
    connection: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl NotificationCenter {
    /// 启动会话：创建存储，加载持久化历史，然后开始消费推送通道
    pub async fn start(
        slot: Arc<dyn DurableSlot>,
        alerts: Arc<AlertDispatcher>,
        channel: Arc<dyn PushChannel>,
        options: StoreOptions,
    ) -> Result<Self> {
        let store = NotificationStore::spawn(slot, alerts, options);
        match store.load().await? {
            LoadOutcome::Failed(reason) => warn!(reason = %reason, "Starting with empty history"),
            outcome => debug!(outcome = ?outcome, "Initial load"),
        }

        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let consumer = StreamConsumer::new(store.handle(), connection_tx).spawn(channel.as_ref(), shutdown_rx);

        info!("Notification center started");
        Ok(Self {
            store,
            channel,
            connection,
            shutdown,
            consumer,
        })
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<bool> {
        self.store.mark_read(id).await
    }

    pub async fn mark_all_as_read(&self) -> Result<usize> {
        self.store.mark_all_read().await
    }

    pub async fn remove_notification(&self, id: &str) -> Result<bool> {
        self.store.remove(id).await
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.store.clear_all().await
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        self.store.sweep_expired().await
    }

    /// 从持久槽重新加载（即使本会话已加载过）
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        self.store.refresh().await
    }

    pub fn subscribe_to_channel(&self, name: &str) -> Result<()> {
        info!(channel = %name, "Subscribing to push channel");
        self.channel.subscribe(name)
    }

    /// 请求后端发送测试通知。未连接时跳过；返回请求是否已发出
    pub fn send_test_message(&self, trigger: &str) -> bool {
        let state = *self.connection.borrow();
        if state != ConnectionState::Connected {
            debug!(state = %state, "Test message skipped, channel not connected");
            return false;
        }
        match self.channel.send_test(trigger) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Test message not sent");
                false
            }
        }
    }

    /// 单行诊断摘要
    pub fn summary(&self) -> String {
        let stats = self.store.projections().current_stats();
        let kinds = stats
            .by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "notifications: {} total, {} unread [{}] | connection: {} | saving: {}",
            stats.total,
            stats.unread,
            kinds,
            *self.connection.borrow(),
            self.store.is_saving()
        )
    }

    pub fn notifications(&self) -> Arc<Vec<Notification>> {
        self.store.snapshot()
    }

    pub fn unread_count(&self) -> watch::Receiver<usize> {
        self.store.projections().unread_count()
    }

    pub fn stats(&self) -> watch::Receiver<NotificationStats> {
        self.store.projections().stats()
    }

    pub fn history(&self) -> watch::Receiver<HistorySnapshot> {
        self.store.projections().history()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn store(&self) -> StoreHandle {
        self.store.handle()
    }

    /// 停止消费，然后排空并持久化存储
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.consumer.await {
            warn!(error = %e, "Stream consumer ended abnormally");
        }
        self.store.shutdown().await;
        info!("Notification center stopped");
    }
}
