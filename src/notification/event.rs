//! 通知实体 - 分类器、存储和编解码共用

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 客户端能展示的事件类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewBooking,
    BookingStatusUpdate,
    TestNotification,
    #[serde(other)]
    Unknown,
}

impl NotificationKind {
    /// 用于 id 和持久化文档的稳定标签
    pub fn as_tag(&self) -> &'static str {
        match self {
            NotificationKind::NewBooking => "new_booking",
            NotificationKind::BookingStatusUpdate => "booking_status_update",
            NotificationKind::TestNotification => "test_notification",
            NotificationKind::Unknown => "unknown",
        }
    }

    /// 该类型的默认提醒标题
    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::NewBooking => "New booking",
            NotificationKind::BookingStatusUpdate => "Booking updated",
            NotificationKind::TestNotification => "Test notification",
            NotificationKind::Unknown => "Notification",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// 预订类事件的字段（`NewBooking` / `BookingStatusUpdate`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPayload {
    pub booking_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// 测试通知的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPayload {
    pub test_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// 按事件类型区分的负载
///
/// 持久化时写成扁平的字符串映射；读取时由记录的 `kind` 决定变体，
/// 见 [`NotificationPayload::from_fields`]。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Booking(BookingPayload),
    Test(TestPayload),
    Other(BTreeMap<String, String>),
}

impl NotificationPayload {
    pub fn booking(booking_id: impl Into<String>) -> Self {
        NotificationPayload::Booking(BookingPayload {
            booking_id: booking_id.into(),
            status: None,
            extra: BTreeMap::new(),
        })
    }

    pub fn test(test_id: impl Into<String>) -> Self {
        NotificationPayload::Test(TestPayload {
            test_id: test_id.into(),
            trigger: None,
            extra: BTreeMap::new(),
        })
    }

    /// 由事件类型和扁平字段重建负载
    ///
    /// 缺少自然键时退化为 `Other`，字段原样保留。
    pub fn from_fields(kind: NotificationKind, mut fields: BTreeMap<String, String>) -> Self {
        match kind {
            NotificationKind::NewBooking | NotificationKind::BookingStatusUpdate => {
                match fields.remove("bookingId") {
                    Some(booking_id) => NotificationPayload::Booking(BookingPayload {
                        booking_id,
                        status: fields.remove("status"),
                        extra: fields,
                    }),
                    None => NotificationPayload::Other(fields),
                }
            }
            NotificationKind::TestNotification => match fields.remove("testId") {
                Some(test_id) => NotificationPayload::Test(TestPayload {
                    test_id,
                    trigger: fields.remove("trigger"),
                    extra: fields,
                }),
                None => NotificationPayload::Other(fields),
            },
            NotificationKind::Unknown => NotificationPayload::Other(fields),
        }
    }

    /// 参与 id 派生的自然键（预订 id 或测试 id）
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            NotificationPayload::Booking(b) => Some(&b.booking_id),
            NotificationPayload::Test(t) => Some(&t.test_id),
            NotificationPayload::Other(_) => None,
        }
    }

    /// 变体未建模的剩余字段
    pub fn extra(&self) -> &BTreeMap<String, String> {
        match self {
            NotificationPayload::Booking(b) => &b.extra,
            NotificationPayload::Test(t) => &t.extra,
            NotificationPayload::Other(map) => map,
        }
    }
}

impl Default for NotificationPayload {
    fn default() -> Self {
        NotificationPayload::Other(BTreeMap::new())
    }
}

/// JSON 标量转字符串；`null` 和嵌套文档返回 `None`
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// 宽松读取存储的负载：标量转字符串，嵌套文档保留为 JSON 文本
fn stored_fields(payload: &Value) -> BTreeMap<String, String> {
    let Some(map) = payload.as_object() else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let text = match v {
                Value::Null => return None,
                Value::Array(_) | Value::Object(_) => v.to_string(),
                _ => scalar_text(v)?,
            };
            Some((k.clone(), text))
        })
        .collect()
}

/// 本地通知历史中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredNotification")]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    /// 统一为毫秒时间戳
    pub created_at_millis: i64,
    pub is_read: bool,
}

/// 持久化文档中的记录形态，负载尚未按类型解析
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNotification {
    id: String,
    kind: NotificationKind,
    title: String,
    message: String,
    #[serde(default)]
    payload: Value,
    created_at_millis: i64,
    #[serde(default)]
    is_read: bool,
}

impl From<StoredNotification> for Notification {
    fn from(stored: StoredNotification) -> Self {
        Self {
            payload: NotificationPayload::from_fields(stored.kind, stored_fields(&stored.payload)),
            id: stored.id,
            kind: stored.kind,
            title: stored.title,
            message: stored.message,
            created_at_millis: stored.created_at_millis,
            is_read: stored.is_read,
        }
    }
}

impl Notification {
    /// 派生事件的稳定 id：`kind_naturalKey_seconds`
    ///
    /// 同一逻辑事件重复投递会得到相同 id，存储据此去重。
    pub fn derive_id(kind: NotificationKind, natural_key: &str, source_seconds: i64) -> String {
        format!("{}_{}_{}", kind.as_tag(), natural_key, source_seconds)
    }

    /// 创建未读通知，标题取该类型的默认值
    pub fn new(
        id: impl Into<String>,
        kind: NotificationKind,
        message: impl Into<String>,
        payload: NotificationPayload,
        created_at_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: kind.title().to_string(),
            message: message.into(),
            payload,
            created_at_millis,
            is_read: false,
        }
    }

    /// 替换标题（链式）
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn booking_id(&self) -> Option<&str> {
        match &self.payload {
            NotificationPayload::Booking(b) => Some(&b.booking_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_format() {
        let id = Notification::derive_id(NotificationKind::NewBooking, "b-42", 1_700_000_000);
        assert_eq!(id, "new_booking_b-42_1700000000");
    }

    #[test]
    fn test_record_uses_camel_case_keys() {
        let n = Notification::new(
            "test_notification_t1_1",
            NotificationKind::TestNotification,
            "hello",
            NotificationPayload::test("t1"),
            1_000,
        );
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "test_notification");
        assert_eq!(json["createdAtMillis"], 1_000);
        assert_eq!(json["isRead"], false);
        assert_eq!(json["payload"]["testId"], "t1");
    }

    #[test]
    fn test_payload_variant_follows_kind() {
        let booking = NotificationPayload::from_fields(
            NotificationKind::BookingStatusUpdate,
            BTreeMap::from([
                ("bookingId".to_string(), "b1".to_string()),
                ("status".to_string(), "confirmed".to_string()),
                ("table".to_string(), "4".to_string()),
            ]),
        );
        match booking {
            NotificationPayload::Booking(b) => {
                assert_eq!(b.booking_id, "b1");
                assert_eq!(b.status.as_deref(), Some("confirmed"));
                assert_eq!(b.extra.get("table").map(String::as_str), Some("4"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        // 测试通知里带 bookingId 也仍是 Test
        let test = NotificationPayload::from_fields(
            NotificationKind::TestNotification,
            BTreeMap::from([
                ("testId".to_string(), "t9".to_string()),
                ("bookingId".to_string(), "b9".to_string()),
            ]),
        );
        assert_eq!(test.natural_key(), Some("t9"));
        assert_eq!(test.extra().get("bookingId").map(String::as_str), Some("b9"));

        let other = NotificationPayload::from_fields(
            NotificationKind::Unknown,
            BTreeMap::from([("bookingId".to_string(), "b1".to_string())]),
        );
        assert_eq!(other.natural_key(), None);
        assert_eq!(other.extra().len(), 1);
    }

    #[test]
    fn test_non_string_payload_values_are_kept() {
        let json = r#"{"id":"new_booking_17_1","kind":"new_booking","title":"t","message":"m",
            "payload":{"bookingId":17,"guests":4,"vip":true,"note":null,"tags":["a"]},
            "createdAtMillis":1000,"isRead":false}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.booking_id(), Some("17"));
        let extra = n.payload.extra();
        assert_eq!(extra.get("guests").map(String::as_str), Some("4"));
        assert_eq!(extra.get("vip").map(String::as_str), Some("true"));
        assert_eq!(extra.get("tags").map(String::as_str), Some(r#"["a"]"#));
        assert!(!extra.contains_key("note"));
    }

    #[test]
    fn test_booking_record_without_key_degrades_to_other() {
        let json = r#"{"id":"x","kind":"new_booking","title":"t","message":"m","payload":{"table":"4"},"createdAtMillis":1}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.payload.natural_key(), None);
        assert_eq!(n.payload.extra().get("table").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_unknown_kind_tag_deserializes() {
        let kind: NotificationKind = serde_json::from_str(r#""order_ready""#).unwrap();
        assert_eq!(kind, NotificationKind::Unknown);
    }

    #[test]
    fn test_old_record_without_optional_fields() {
        let json = r#"{"id":"a","kind":"new_booking","title":"t","message":"m","createdAtMillis":5}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert!(!n.is_read);
        assert_eq!(n.payload, NotificationPayload::default());
    }
}
