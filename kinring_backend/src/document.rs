use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level document body: a flat JSON object, schemaless by design.
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    /// Server-assigned, RFC 3339 with millisecond precision.
    pub write_time: String,
}

impl Document {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn timestamp_field(&self, key: &str) -> Option<DateTime<Utc>> {
        self.str_field(key)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// True when the field is present and not JSON null. Distinguishes a
    /// written-as-null marker (e.g. `viewedAt: null`) from a set value.
    pub fn has_value(&self, key: &str) -> bool {
        matches!(self.fields.get(key), Some(value) if !value.is_null())
    }
}
