// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamp normalization for externally supplied event times.
//!
//! Providers deliver timestamps as epoch-seconds, epoch-millis, or ISO-8601
//! strings depending on the channel and event type. Everything is normalized
//! to UTC epoch-milliseconds before comparison or storage.

use chrono::DateTime;
use serde_json::Value;

/// Numeric values below this are interpreted as epoch-seconds, at or above
/// as epoch-millis. 1e11 seconds is year 5138; 1e11 millis is 1973.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

fn from_numeric(n: i64) -> Option<i64> {
    if n <= 0 {
        return None;
    }
    if n < EPOCH_MILLIS_CUTOFF {
        n.checked_mul(1000)
    } else {
        Some(n)
    }
}

/// Parse a provider-supplied timestamp into epoch-milliseconds.
///
/// Accepts JSON numbers (epoch-seconds or epoch-millis) and strings holding
/// either a decimal epoch value or an ISO-8601 / RFC 3339 instant. Returns
/// `None` for anything unparseable; callers fall back to ingestion time.
pub fn parse_event_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                from_numeric(i)
            } else {
                n.as_f64().and_then(|f| from_numeric(f as i64))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(n) = trimmed.parse::<i64>() {
                return from_numeric(n);
            }
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}
