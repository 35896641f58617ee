//! 时间戳归一化
//!
//! 推送事件的时间可能是秒也可能是毫秒，且不注明单位。历史中统一存毫秒。

use chrono::Utc;

/// 2001 到 2286 年间秒级时间戳的字符数
const SECONDS_EPOCH_DIGITS: usize = 10;

/// 把未知单位的时间戳转成毫秒
///
/// 十进制表示恰好 10 个字符的值视为秒并乘以 1000，其他值视为已是毫秒。
/// 规则与旧客户端写入的历史完全兼容，包括边界情况（10 个字符的负数同样会被放大）。
pub fn normalize_to_millis(timestamp: i64) -> i64 {
    if timestamp.to_string().len() == SECONDS_EPOCH_DIGITS {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}

/// 当前时间（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒时间戳的整秒部分，用于派生稳定 id
pub fn millis_to_seconds(millis: i64) -> i64 {
    millis.div_euclid(1000)
}
