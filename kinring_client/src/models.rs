use chrono::{DateTime, Utc};
use kinring_backend::{Document, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Senior,
    Relative,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Senior => "senior",
            Role::Relative => "relative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "senior" => Some(Role::Senior),
            "relative" => Some(Role::Relative),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting user, passed explicitly to every service instead of living in
/// ambient global state.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct CareCircle {
    pub id: String,
    pub senior_id: String,
    pub senior_name: String,
    pub invite_code: String,
    pub created_at: Option<String>,
}

impl CareCircle {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            id: doc.id.clone(),
            senior_id: doc.str_field("seniorId")?.to_string(),
            senior_name: doc.str_field("seniorName").unwrap_or("Senior").to_string(),
            invite_code: doc.str_field("inviteCode")?.to_string(),
            created_at: doc.str_field("createdAt").map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub doc_id: String,
    pub circle_id: String,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub relationship: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            doc_id: doc.id.clone(),
            circle_id: doc.str_field("circleId")?.to_string(),
            user_id: lenient_id(doc.fields.get("userId")?)?,
            display_name: doc.str_field("displayName").unwrap_or("Unknown").to_string(),
            role: doc
                .str_field("role")
                .and_then(Role::parse)
                .unwrap_or(Role::Relative),
            relationship: doc.str_field("relationship").map(str::to_string),
            joined_at: doc.timestamp_field("joinedAt"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemberStatus {
    /// The document id doubles as the author's user id.
    pub user_id: String,
    pub status: String,
    pub display_name: String,
    pub role: Role,
    pub updated_at: Option<DateTime<Utc>>,
}

impl MemberStatus {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            user_id: doc.id.clone(),
            status: doc.str_field("status")?.to_string(),
            display_name: doc.str_field("displayName").unwrap_or("Unknown").to_string(),
            role: doc
                .str_field("role")
                .and_then(Role::parse)
                .unwrap_or(Role::Relative),
            updated_at: doc.timestamp_field("updatedAt"),
        })
    }
}

/// A logged symptom. The body stays schemaless (the selector UI evolves
/// faster than the log), with typed accessors for the fields reports need.
#[derive(Debug, Clone)]
pub struct SymptomEntry {
    pub doc_id: String,
    pub catalog_id: Option<String>,
    pub label: Option<String>,
    pub time: Option<String>,
    pub date: Option<String>,
    pub logged_at: Option<DateTime<Utc>>,
    pub fields: Fields,
}

impl SymptomEntry {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            doc_id: doc.id.clone(),
            catalog_id: doc.str_field("id").map(str::to_string),
            label: doc.str_field("label").map(str::to_string),
            time: doc.str_field("time").map(str::to_string),
            date: doc.str_field("date").map(str::to_string),
            logged_at: doc.timestamp_field("loggedAt"),
            fields: doc.fields.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HelpItem {
    pub doc_id: String,
    pub catalog_id: Option<String>,
    pub label: Option<String>,
    pub emoji: Option<String>,
    pub created_by: Option<String>,
    pub created_by_role: Option<Role>,
    pub created_at: Option<DateTime<Utc>>,
}

impl HelpItem {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            doc_id: doc.id.clone(),
            catalog_id: doc.str_field("id").map(str::to_string),
            label: doc.str_field("label").map(str::to_string),
            emoji: doc.str_field("emoji").map(str::to_string),
            created_by: doc.str_field("createdBy").map(str::to_string),
            created_by_role: doc.str_field("createdByRole").and_then(Role::parse),
            created_at: doc.timestamp_field("createdAt"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Ping {
    pub doc_id: String,
    pub from_name: String,
    pub from_user_id: String,
    pub to_role: Option<Role>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Ping {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            doc_id: doc.id.clone(),
            from_name: doc.str_field("fromName").unwrap_or("Family").to_string(),
            from_user_id: doc.str_field("fromUserId")?.to_string(),
            to_role: doc.str_field("toRole").and_then(Role::parse),
            sent_at: doc.timestamp_field("sentAt"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub doc_id: String,
    pub storage_path: String,
    pub from_user_id: String,
    pub from_name: String,
    pub mime: Option<String>,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub viewed: bool,
}

impl Photo {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            doc_id: doc.id.clone(),
            storage_path: doc.str_field("storagePath")?.to_string(),
            from_user_id: doc.str_field("fromUserId")?.to_string(),
            from_name: doc.str_field("fromName").unwrap_or("Family").to_string(),
            mime: doc.str_field("mime").map(str::to_string),
            size_bytes: doc.i64_field("sizeBytes"),
            checksum: doc.str_field("checksum").map(str::to_string),
            uploaded_at: doc.timestamp_field("uploadedAt"),
            viewed: doc.has_value("viewedAt"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: Option<String>,
}

impl UserProfile {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            user_id: doc.id.clone(),
            display_name: doc.str_field("displayName")?.to_string(),
            role: doc.str_field("role").and_then(Role::parse)?,
            created_at: doc.str_field("createdAt").map(str::to_string),
        })
    }
}

/// Accepts legacy rows whose user id was imported as a JSON number.
pub(crate) fn lenient_id(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convenience for building document bodies from `json!` literals.
pub fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => {
            debug_assert!(false, "expected JSON object, got {other}");
            Fields::new()
        }
    }
}
