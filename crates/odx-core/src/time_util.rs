//! Wall-clock timestamps used by request signing.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **nanoseconds** since Unix epoch.
#[inline]
pub fn now_ns() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
