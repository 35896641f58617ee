//! Venue Notify - 实时预订通知与本地持久化历史

pub mod config;
pub mod infra;
pub mod notification;

pub use config::NotifyConfig;
pub use infra::{
    ConnectionState, DurableSlot, FileSlot, LineChannel, LoopbackChannel, MemorySlot, OutboundCommand, PushChannel,
};
pub use notification::{
    classify, AlertDispatcher, Classified, LoadOutcome, MergeOutcome, Notification, NotificationCenter,
    NotificationKind, NotificationStats, NotificationStore, StoreHandle, StoreOptions,
};
