//! 通知存储 - 有界、去重、可持久化的历史
//!
//! 历史由单个任务持有，所有操作都是队列中的命令，按提交顺序执行、互不交错。
//! 每次变更发布新快照，由持久化任务在后台写入，并据此刷新派生视图。

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec;
use super::dispatcher::AlertDispatcher;
use super::event::Notification;
use super::persist::Persister;
use super::presenter::Alert;
use super::projection::{ProjectionPublisher, Projections};
use super::timestamp::now_millis;
use crate::config::{NotifyConfig, DEFAULT_CAPACITY, DEFAULT_RETENTION_DAYS};
use crate::infra::slot::DurableSlot;

const STORE_CLOSED: &str = "notification store is shut down";

/// 存储限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub capacity: usize,
    pub retention_millis: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention_millis: DEFAULT_RETENTION_DAYS as i64 * 24 * 60 * 60 * 1000,
        }
    }
}

impl From<&NotifyConfig> for StoreOptions {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            capacity: config.effective_capacity(),
            retention_millis: config.retention_millis(),
        }
    }
}

/// [`StoreHandle::merge`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// 已存在相同 id 的记录
    Duplicate,
    /// 历史已满且比所有保留记录都旧，不保留
    Evicted,
}

/// [`StoreHandle::load`] 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded {
        count: usize,
        duplicates: usize,
        expired: usize,
    },
    /// 本会话已加载
    AlreadyLoaded,
    /// 读取或解码失败，内存状态不变
    Failed(String),
}

enum StoreCommand {
    Merge {
        notification: Notification,
        reply: oneshot::Sender<MergeOutcome>,
    },
    MarkRead {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    MarkAllRead {
        reply: oneshot::Sender<usize>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        reply: oneshot::Sender<usize>,
    },
    SweepExpired {
        max_age_millis: i64,
        reply: oneshot::Sender<usize>,
    },
    Load {
        force: bool,
        reply: oneshot::Sender<LoadOutcome>,
    },
    /// 之前的命令全部执行后返回当前版本号
    Barrier {
        reply: oneshot::Sender<u64>,
    },
    Shutdown,
}

/// 运行中存储的可克隆句柄
#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::UnboundedSender<StoreCommand>,
    projections: Projections,
    persisted: watch::Receiver<u64>,
    saving: Arc<AtomicBool>,
    retention_millis: i64,
}

impl StoreHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> StoreCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| anyhow!(STORE_CLOSED))?;
        rx.await.map_err(|_| anyhow!(STORE_CLOSED))
    }

    /// 不存在相同 id 时插入
    pub async fn merge(&self, notification: Notification) -> Result<MergeOutcome> {
        self.request(|reply| StoreCommand::Merge { notification, reply }).await
    }

    /// 返回记录是否有变化
    pub async fn mark_read(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| StoreCommand::MarkRead { id, reply }).await
    }

    /// 返回变化的记录数
    pub async fn mark_all_read(&self) -> Result<usize> {
        self.request(|reply| StoreCommand::MarkAllRead { reply }).await
    }

    pub async fn remove(&self, id: impl Into<String>) -> Result<bool> {
        let id = id.into();
        self.request(|reply| StoreCommand::Remove { id, reply }).await
    }

    /// 清空历史和持久槽，返回删除数量
    pub async fn clear_all(&self) -> Result<usize> {
        self.request(|reply| StoreCommand::ClearAll { reply }).await
    }

    /// 按配置的保留期清理
    pub async fn sweep_expired(&self) -> Result<usize> {
        let max_age_millis = self.retention_millis;
        self.request(|reply| StoreCommand::SweepExpired { max_age_millis, reply })
            .await
    }

    pub async fn sweep_older_than(&self, max_age: Duration) -> Result<usize> {
        let max_age_millis = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        self.request(|reply| StoreCommand::SweepExpired { max_age_millis, reply })
            .await
    }

    /// 加载持久化历史（每个会话一次）
    pub async fn load(&self) -> Result<LoadOutcome> {
        self.request(|reply| StoreCommand::Load { force: false, reply }).await
    }

    /// 重置加载标记并从持久槽重新加载
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        self.request(|reply| StoreCommand::Load { force: true, reply }).await
    }

    /// 等待此前所有变更都已写入（或已尝试写入）持久槽
    pub async fn flush(&self) -> Result<()> {
        let revision = self.request(|reply| StoreCommand::Barrier { reply }).await?;
        let mut persisted = self.persisted.clone();
        if persisted.wait_for(|p| *p >= revision).await.is_err() {
            debug!(revision, "Persister gone before flush completed");
        }
        Ok(())
    }

    pub fn projections(&self) -> &Projections {
        &self.projections
    }

    /// 当前历史，按时间从新到旧
    pub fn snapshot(&self) -> Arc<Vec<Notification>> {
        self.projections.current()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn persisted_revision(&self) -> u64 {
        *self.persisted.borrow()
    }
}

/// 存储任务的所有者，可解引用为 [`StoreHandle`]
pub struct NotificationStore {
    handle: StoreHandle,
    actor: JoinHandle<()>,
    persister: JoinHandle<()>,
}

impl NotificationStore {
    /// 启动存储及其持久化任务。历史初始为空，需调用 [`StoreHandle::load`] 读取持久槽
    pub fn spawn(slot: Arc<dyn DurableSlot>, alerts: Arc<AlertDispatcher>, options: StoreOptions) -> Self {
        let (publisher, projections) = ProjectionPublisher::new();
        let (persisted_tx, persisted_rx) = watch::channel(0u64);
        let saving = Arc::new(AtomicBool::new(false));

        let persister = Persister::new(
            slot.clone(),
            publisher.subscribe_history(),
            persisted_tx,
            saving.clone(),
        )
        .spawn();

        let (commands, queue) = mpsc::unbounded_channel();
        let actor = StoreActor {
            entries: Vec::new(),
            capacity: options.capacity.max(1),
            revision: 0,
            loaded: false,
            retention_millis: options.retention_millis,
            slot,
            alerts,
            publisher,
            persisted: persisted_rx.clone(),
        };
        let actor = tokio::spawn(actor.run(queue));

        info!(capacity = options.capacity.max(1), "Notification store started");
        Self {
            handle: StoreHandle {
                commands,
                projections,
                persisted: persisted_rx,
                saving,
                retention_millis: options.retention_millis,
            },
            actor,
            persister,
        }
    }

    pub fn handle(&self) -> StoreHandle {
        self.handle.clone()
    }

    /// 排空队列中的命令，写入最终状态并停止两个任务
    pub async fn shutdown(self) {
        let _ = self.handle.commands.send(StoreCommand::Shutdown);
        if let Err(e) = self.actor.await {
            warn!(error = %e, "Store task ended abnormally");
        }
        if let Err(e) = self.persister.await {
            warn!(error = %e, "Persister task ended abnormally");
        }
        info!("Notification store shut down");
    }
}

impl Deref for NotificationStore {
    type Target = StoreHandle;

    fn deref(&self) -> &StoreHandle {
        &self.handle
    }
}

struct StoreActor {
    /// 从新到旧，id 唯一，最多 `capacity` 条
    entries: Vec<Notification>,
    capacity: usize,
    revision: u64,
    /// 本会话是否已加载；加载在任务内串行执行，队列本身即并发加载的保护
    loaded: bool,
    retention_millis: i64,
    slot: Arc<dyn DurableSlot>,
    alerts: Arc<AlertDispatcher>,
    publisher: ProjectionPublisher,
    persisted: watch::Receiver<u64>,
}

impl StoreActor {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<StoreCommand>) {
        while let Some(command) = queue.recv().await {
            match command {
                StoreCommand::Merge { notification, reply } => {
                    let _ = reply.send(self.merge(notification));
                }
                StoreCommand::MarkRead { id, reply } => {
                    let _ = reply.send(self.mark_read(&id));
                }
                StoreCommand::MarkAllRead { reply } => {
                    let _ = reply.send(self.mark_all_read());
                }
                StoreCommand::Remove { id, reply } => {
                    let _ = reply.send(self.remove(&id));
                }
                StoreCommand::ClearAll { reply } => {
                    let _ = reply.send(self.clear_all());
                }
                StoreCommand::SweepExpired { max_age_millis, reply } => {
                    let _ = reply.send(self.sweep_expired(max_age_millis));
                }
                StoreCommand::Load { force, reply } => {
                    let outcome = self.load(force).await;
                    let _ = reply.send(outcome);
                }
                StoreCommand::Barrier { reply } => {
                    let _ = reply.send(self.revision);
                }
                StoreCommand::Shutdown => break,
            }
        }
        debug!(entries = self.entries.len(), "Store task stopped");
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.publisher.publish(self.revision, self.entries.clone());
    }

    fn merge(&mut self, notification: Notification) -> MergeOutcome {
        if self.entries.iter().any(|e| e.id == notification.id) {
            debug!(id = %notification.id, "Duplicate notification ignored");
            return MergeOutcome::Duplicate;
        }

        // ties go in front: a merge prepends among equal timestamps
        let position = self
            .entries
            .partition_point(|e| e.created_at_millis > notification.created_at_millis);
        if position >= self.capacity {
            debug!(id = %notification.id, "Notification older than retained history, dropped");
            return MergeOutcome::Evicted;
        }

        let alert = Alert::from(&notification);
        info!(id = %notification.id, kind = %notification.kind, "New notification");
        self.entries.insert(position, notification);
        if self.entries.len() > self.capacity {
            let dropped = self.entries.len() - self.capacity;
            self.entries.truncate(self.capacity);
            debug!(dropped, "History trimmed to capacity");
        }
        self.publish();
        self.alerts.present(&alert);
        MergeOutcome::Inserted
    }

    fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) if !entry.is_read => {
                entry.is_read = true;
                self.publish();
                true
            }
            Some(_) => false,
            None => {
                debug!(id = %id, "mark_read: no such notification");
                false
            }
        }
    }

    fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.is_read) {
            entry.is_read = true;
            changed += 1;
        }
        if changed > 0 {
            self.publish();
        }
        changed
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() < before;
        if removed {
            self.publish();
        }
        removed
    }

    fn clear_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        // published even when already empty so the durable slot is emptied too
        self.publish();
        self.alerts.dismiss_all();
        info!(removed, "Notification history cleared");
        removed
    }

    fn sweep_expired(&mut self, max_age_millis: i64) -> usize {
        let removed = retain_recent(&mut self.entries, now_millis().saturating_sub(max_age_millis));
        if removed > 0 {
            info!(removed, "Expired notifications swept");
            self.publish();
        }
        removed
    }

    async fn load(&mut self, force: bool) -> LoadOutcome {
        if self.loaded && !force {
            return LoadOutcome::AlreadyLoaded;
        }

        if force {
            // never re-read a document this session has not finished writing
            let revision = self.revision;
            let _ = self.persisted.wait_for(|p| *p >= revision).await;
        }

        let slot = self.slot.clone();
        let read = match tokio::task::spawn_blocking(move || slot.read()).await {
            Ok(read) => read,
            Err(e) => Err(anyhow!("load task failed: {}", e)),
        };
        let decoded = read.and_then(|raw| codec::decode(&raw));
        self.loaded = true;

        let stored = match decoded {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Failed to load notification history");
                return LoadOutcome::Failed(e.to_string());
            }
        };

        let stored_count = stored.len();
        let mut entries = dedup_keep_latest(stored);
        let duplicates = stored_count - entries.len();
        let expired = retain_recent(
            &mut entries,
            now_millis().saturating_sub(self.retention_millis),
        );
        entries.sort_by(|a, b| b.created_at_millis.cmp(&a.created_at_millis));
        entries.truncate(self.capacity);

        self.entries = entries;
        self.publish();
        info!(
            count = self.entries.len(),
            duplicates,
            expired,
            "Notification history loaded"
        );
        LoadOutcome::Loaded {
            count: self.entries.len(),
            duplicates,
            expired,
        }
    }
}

/// 每个 id 保留时间戳最大的一条（相同时保留先出现的），幸存记录保持原有顺序
fn dedup_keep_latest(entries: Vec<Notification>) -> Vec<Notification> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    let mut kept: Vec<Notification> = Vec::with_capacity(entries.len());

    for entry in entries {
        match index.get(&entry.id) {
            Some(&i) => {
                if entry.created_at_millis > kept[i].created_at_millis {
                    kept[i] = entry;
                }
            }
            None => {
                index.insert(entry.id.clone(), kept.len());
                kept.push(entry);
            }
        }
    }
    kept
}

/// 删除早于 `cutoff_millis` 的记录，返回删除数量
fn retain_recent(entries: &mut Vec<Notification>, cutoff_millis: i64) -> usize {
    let before = entries.len();
    entries.retain(|e| e.created_at_millis >= cutoff_millis);
    before - entries.len()
}
