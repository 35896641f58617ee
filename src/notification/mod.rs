//! 通知引擎 - 推送接入、本地历史和派生视图
//!
//! # 流程
//! 1. `StreamConsumer` 从 `PushChannel` 读取原始帧
//! 2. `classify` 把帧转成 `Notification`（或忽略）
//! 3. `NotificationStore` 合并进有界历史，经 `AlertDispatcher` 提醒，并安排持久化写入
//! 4. `Projections`（未读数、统计、历史）推送给所有观察者
//!
//! # 示例
//! ```ignore
//! use venue_notify::notification::{AlertDispatcher, NotificationCenter, StoreOptions};
//! use venue_notify::infra::{LoopbackChannel, MemorySlot};
//!
//! let center = NotificationCenter::start(
//!     Arc::new(MemorySlot::new()),
//!     Arc::new(AlertDispatcher::new()),
//!     Arc::new(LoopbackChannel::new(64)),
//!     StoreOptions::default(),
//! ).await?;
//! let unread = center.unread_count();
//! ```

pub mod center;
pub mod classifier;
pub mod codec;
pub mod consumer;
pub mod dispatcher;
pub mod event;
mod persist;
pub mod presenter;
pub mod presenters;
pub mod projection;
pub mod store;
pub mod timestamp;

pub use center::NotificationCenter;
pub use classifier::{classify, classify_at, Classified, IgnoreReason};
pub use consumer::{FrameOutcome, StreamConsumer};
pub use dispatcher::AlertDispatcher;
pub use event::{BookingPayload, Notification, NotificationKind, NotificationPayload, TestPayload};
pub use presenter::{Alert, AlertPresenter, PresentResult};
pub use presenters::{LocalFilePresenter, LogPresenter};
pub use projection::{HistorySnapshot, NotificationStats, Projections};
pub use store::{LoadOutcome, MergeOutcome, NotificationStore, StoreHandle, StoreOptions};
pub use timestamp::normalize_to_millis;
