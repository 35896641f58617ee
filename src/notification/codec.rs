//! 历史编解码 - 整个历史存为一个 JSON 数组字符串

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::warn;

use super::event::Notification;

/// 空历史对应的文档
pub const EMPTY_DOCUMENT: &str = "[]";

/// 序列化历史（从新到旧）
pub fn encode(entries: &[Notification]) -> Result<String> {
    Ok(serde_json::to_string(entries)?)
}

/// 解析存储的文档
///
/// 空白输入视为空历史；非数组文档返回错误；
/// 无法解析的单条记录会被跳过，不影响其余记录。
pub fn decode(raw: &str) -> Result<Vec<Notification>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: Value = serde_json::from_str(raw)?;
    let Value::Array(records) = document else {
        bail!("notification history is not a JSON array");
    };

    let total = records.len();
    let entries: Vec<Notification> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable notification record");
                None
            }
        })
        .collect();

    if entries.len() < total {
        warn!(kept = entries.len(), total, "Notification history partially decoded");
    }
    Ok(entries)
}
