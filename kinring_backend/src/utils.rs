//! Shared helpers and constants will live here.

use chrono::{SecondsFormat, Utc};

pub const APP_NAME: &str = "kinring_backend";

/// Millisecond-precision UTC timestamp. All store timestamps use this format
/// so lexicographic order matches chronological order.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
