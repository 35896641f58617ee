//! 推送通道接口及两个适配器
//!
//! 引擎不管理连接本身，只读取消息流和连接状态流，并发出 `subscribe` / `send_test` 命令。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::notification::timestamp::now_millis;

/// 推送通道报告的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// 外部实时通道
pub trait PushChannel: Send + Sync {
    /// 原始文本帧流，每次调用返回独立的接收端
    fn messages(&self) -> broadcast::Receiver<String>;

    /// 连接状态变化流
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// 请求后端为本客户端订阅频道
    fn subscribe(&self, channel: &str) -> Result<()>;

    /// 请求后端发送测试通知
    fn send_test(&self, trigger: &str) -> Result<()>;
}

/// [`LoopbackChannel`] 记录的出站命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Subscribe(String),
    SendTest(String),
}

/// 内存通道。帧由持有方注入；`send_test` 像后端一样回送 `test_notification` 帧
pub struct LoopbackChannel {
    frames: broadcast::Sender<String>,
    state: watch::Sender<ConnectionState>,
    sent: Mutex<Vec<OutboundCommand>>,
    next_test_id: AtomicU64,
}

impl LoopbackChannel {
    pub fn new(buffer: usize) -> Self {
        let (frames, _) = broadcast::channel(buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            frames,
            state,
            sent: Mutex::new(Vec::new()),
            next_test_id: AtomicU64::new(1),
        }
    }

    /// 向所有订阅者投递原始帧，无人订阅时返回 false
    pub fn inject(&self, raw: impl Into<String>) -> bool {
        self.frames.send(raw.into()).is_ok()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// 已发出的命令
    pub fn sent(&self) -> Vec<OutboundCommand> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn record(&self, command: OutboundCommand) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(command);
        }
    }
}

impl PushChannel for LoopbackChannel {
    fn messages(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn subscribe(&self, channel: &str) -> Result<()> {
        self.record(OutboundCommand::Subscribe(channel.to_string()));
        self.inject(json!({"type": "subscribed", "channel": channel}).to_string());
        Ok(())
    }

    fn send_test(&self, trigger: &str) -> Result<()> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(anyhow!("loopback channel is not connected"));
        }
        self.record(OutboundCommand::SendTest(trigger.to_string()));
        let test_id = self.next_test_id.fetch_add(1, Ordering::Relaxed);
        let frame = json!({
            "type": "test_notification",
            "payload": {
                "testId": format!("loopback-{}", test_id),
                "trigger": trigger,
                "message": format!("Test triggered by {}", trigger),
                "timestamp": now_millis(),
            }
        });
        self.inject(frame.to_string());
        Ok(())
    }
}

/// 基于行文本的通道：从异步读取器逐行读帧，命令以 JSON 行写到 stdout
pub struct LineChannel {
    frames: broadcast::Sender<String>,
    state: watch::Sender<ConnectionState>,
}

impl LineChannel {
    pub fn new(buffer: usize) -> Self {
        let (frames, _) = broadcast::channel(buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { frames, state }
    }

    /// 从 `reader` 读取帧，直到 EOF 或读取出错
    ///
    /// 调用前先订阅 [`PushChannel::messages`]，无订阅者时帧会被丢弃。
    pub async fn run<R>(&self, reader: R) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        self.state.send_replace(ConnectionState::Connecting);
        let mut lines = reader.lines();
        let mut count = 0u64;
        self.state.send_replace(ConnectionState::Connected);
        info!("Line channel connected");

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    count += 1;
                    if self.frames.send(line.to_string()).is_err() {
                        debug!("Frame dropped, no subscribers");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Line channel read failed");
                    self.state.send_replace(ConnectionState::Error);
                    return Err(e.into());
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!(frames = count, "Line channel reached end of input");
        Ok(count)
    }

    fn emit(&self, command: serde_json::Value) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", command)?;
        stdout.flush()?;
        Ok(())
    }
}

impl PushChannel for LineChannel {
    fn messages(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn subscribe(&self, channel: &str) -> Result<()> {
        self.emit(json!({"type": "subscribe", "channel": channel}))
    }

    fn send_test(&self, trigger: &str) -> Result<()> {
        self.emit(json!({"type": "send_test", "trigger": trigger}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_echoes_test_frame_when_connected() {
        let channel = LoopbackChannel::new(8);
        let mut rx = channel.messages();
        assert!(channel.send_test("manual").is_err());

        channel.set_state(ConnectionState::Connected);
        channel.send_test("manual").unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("test_notification"));
        assert!(frame.contains("loopback-1"));
        assert_eq!(channel.sent(), vec![OutboundCommand::SendTest("manual".to_string())]);
    }

    #[tokio::test]
    async fn test_loopback_subscribe_acks() {
        let channel = LoopbackChannel::new(8);
        let mut rx = channel.messages();
        channel.subscribe("bookings").unwrap();
        assert!(rx.recv().await.unwrap().contains("subscribed"));
    }

    #[tokio::test]
    async fn test_line_channel_pumps_non_empty_lines() {
        let channel = LineChannel::new(8);
        let mut rx = channel.messages();
        let mut state = channel.connection_state();
        let input: &[u8] = b"{\"type\":\"ping\"}\n\n  \n{\"type\":\"pong\"}\n";

        let count = channel.run(input).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
    }
}
