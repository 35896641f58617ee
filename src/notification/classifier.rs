//! 推送消息分类器
//!
//! 把推送通道的原始文本帧转成类型化通知，或判定为控制帧/不展示的消息。
//! 永不失败：格式错误的帧记录日志后忽略。

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::event::{scalar_text, BookingPayload, Notification, NotificationKind, NotificationPayload, TestPayload};
use super::timestamp::{millis_to_seconds, normalize_to_millis, now_millis};

/// 单帧分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// 已识别的事件，可合并进存储
    Event(Notification),
    /// 控制帧或无法使用的帧
    Ignored(IgnoreReason),
    /// 格式正确但类型未知的帧
    Unknown(String),
}

/// 忽略原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 握手、心跳、订阅确认或错误帧
    Control(String),
    /// 不是 JSON 对象，或没有类型标签
    Malformed,
    /// 类型已识别但缺少自然键
    MissingKey(NotificationKind),
}

const CONTROL_TAGS: &[&str] = &[
    "connection_established",
    "connected",
    "welcome",
    "ping",
    "pong",
    "heartbeat",
    "subscribed",
    "subscription_succeeded",
    "subscription_ack",
    "unsubscribed",
    "error",
];

/// 分类单帧，缺少时间戳时使用当前时间
pub fn classify(raw: &str) -> Classified {
    classify_at(raw, now_millis())
}

/// 分类单帧；事件不带时间戳时使用 `now_millis`
pub fn classify_at(raw: &str, now_millis: i64) -> Classified {
    let document: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, len = raw.len(), "Discarding unparseable push frame");
            return Classified::Ignored(IgnoreReason::Malformed);
        }
    };

    let Some(root) = document.as_object() else {
        warn!("Discarding push frame that is not an object");
        return Classified::Ignored(IgnoreReason::Malformed);
    };

    let Some(tag) = type_tag(root) else {
        warn!("Discarding push frame without a type tag");
        return Classified::Ignored(IgnoreReason::Malformed);
    };

    if CONTROL_TAGS.contains(&tag.as_str()) {
        debug!(tag = %tag, "Control frame ignored");
        return Classified::Ignored(IgnoreReason::Control(tag));
    }

    let kind = match kind_for_tag(&tag) {
        Some(kind) => kind,
        None => {
            debug!(tag = %tag, "Unknown push frame type");
            return Classified::Unknown(tag);
        }
    };

    let body = payload_document(root);
    let created_at_millis = source_timestamp(body, root)
        .map(normalize_to_millis)
        .unwrap_or(now_millis);

    let payload = match kind {
        NotificationKind::NewBooking | NotificationKind::BookingStatusUpdate => {
            let Some(booking_id) = string_field(body, &["bookingId", "booking_id"]) else {
                warn!(kind = %kind, "Booking frame without booking id");
                return Classified::Ignored(IgnoreReason::MissingKey(kind));
            };
            NotificationPayload::Booking(BookingPayload {
                booking_id,
                status: string_field(body, &["status", "newStatus", "new_status"]),
                extra: residual(body, &["bookingId", "booking_id", "status", "newStatus", "new_status"]),
            })
        }
        NotificationKind::TestNotification => {
            let Some(test_id) = string_field(body, &["testId", "test_id"]) else {
                warn!("Test frame without test id");
                return Classified::Ignored(IgnoreReason::MissingKey(kind));
            };
            NotificationPayload::Test(TestPayload {
                test_id,
                trigger: string_field(body, &["trigger"]),
                extra: residual(body, &["testId", "test_id", "trigger"]),
            })
        }
        NotificationKind::Unknown => return Classified::Unknown(tag),
    };

    let natural_key = payload.natural_key().unwrap_or_default().to_string();
    let id = Notification::derive_id(kind, &natural_key, millis_to_seconds(created_at_millis));
    let message = string_field(body, &["message"])
        .or_else(|| string_field(root, &["message"]))
        .unwrap_or_else(|| default_message(kind, &payload));
    let mut notification = Notification::new(id, kind, message, payload, created_at_millis);
    if let Some(title) = string_field(body, &["title"]) {
        notification = notification.with_title(title);
    }

    debug!(id = %notification.id, kind = %kind, "Classified push frame");
    Classified::Event(notification)
}

fn type_tag(root: &Map<String, Value>) -> Option<String> {
    root.get("type")
        .or_else(|| root.get("event"))
        .and_then(Value::as_str)
        .map(|s| {
            s.trim()
                .to_ascii_lowercase()
                .chars()
                .map(|c| if c == '-' || c == ' ' { '_' } else { c })
                .collect::<String>()
        })
        .filter(|s| !s.is_empty())
}

fn kind_for_tag(tag: &str) -> Option<NotificationKind> {
    match tag {
        "new_booking" | "booking_created" => Some(NotificationKind::NewBooking),
        "booking_status_update" | "booking_status_changed" | "booking_updated" => {
            Some(NotificationKind::BookingStatusUpdate)
        }
        "test_notification" | "test" => Some(NotificationKind::TestNotification),
        _ => None,
    }
}

/// 嵌套的负载文档；没有时取帧本身
fn payload_document(root: &Map<String, Value>) -> &Map<String, Value> {
    root.get("payload")
        .and_then(Value::as_object)
        .or_else(|| root.get("data").and_then(Value::as_object))
        .unwrap_or(root)
}

fn source_timestamp(body: &Map<String, Value>, root: &Map<String, Value>) -> Option<i64> {
    const KEYS: &[&str] = &["timestamp", "createdAt", "created_at"];
    KEYS.iter()
        .find_map(|k| body.get(*k).and_then(as_integer))
        .or_else(|| KEYS.iter().find_map(|k| root.get(*k).and_then(as_integer)))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// 类型化负载未使用的标量字段，嵌套文档丢弃
fn residual(map: &Map<String, Value>, consumed: &[&str]) -> BTreeMap<String, String> {
    const SKIP: &[&str] = &["message", "title", "timestamp", "createdAt", "created_at", "type"];
    map.iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()) && !SKIP.contains(&k.as_str()))
        .filter_map(|(k, v)| Some((k.clone(), scalar_text(v)?)))
        .collect()
}

fn default_message(kind: NotificationKind, payload: &NotificationPayload) -> String {
    match (kind, payload) {
        (NotificationKind::NewBooking, NotificationPayload::Booking(b)) => {
            format!("Booking {} was created", b.booking_id)
        }
        (NotificationKind::BookingStatusUpdate, NotificationPayload::Booking(b)) => match &b.status {
            Some(status) => format!("Booking {} is now {}", b.booking_id, status),
            None => format!("Booking {} was updated", b.booking_id),
        },
        (NotificationKind::TestNotification, NotificationPayload::Test(t)) => match &t.trigger {
            Some(trigger) => format!("Test notification ({})", trigger),
            None => "Test notification".to_string(),
        },
        _ => kind.title().to_string(),
    }
}
