//! 协作方接口 - 持久存储和推送通道

pub mod push;
pub mod slot;

pub use push::{ConnectionState, LineChannel, LoopbackChannel, OutboundCommand, PushChannel};
pub use slot::{DurableSlot, FileSlot, MemorySlot};
