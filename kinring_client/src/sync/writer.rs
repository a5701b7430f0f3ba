use crate::error::ErrorSlot;
use chrono::Utc;
use kinring_backend::{Fields, Store};

/// Which outgoing fields survive sanitization. UI-layer residue (component
/// references, event objects, callbacks) must never reach the wire.
#[derive(Debug, Clone, Copy)]
pub enum FieldPolicy {
    /// Only these exact keys survive.
    Allow(&'static [&'static str]),
    /// Keep everything except private keys and event-object residue.
    Relaxed,
}

pub fn sanitize(fields: &Fields, policy: FieldPolicy) -> Fields {
    match policy {
        FieldPolicy::Allow(keys) => fields
            .iter()
            .filter(|(key, _)| keys.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        FieldPolicy::Relaxed => fields
            .iter()
            .filter(|(key, _)| {
                !key.starts_with('_') && key.as_str() != "nativeEvent" && key.as_str() != "target"
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    }
}

/// Client-generated document id. Two ids from the same actor in the same
/// millisecond collide; callers accept that at family scale.
pub fn client_id(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().timestamp_millis())
}

/// Applies writes optimistically: callers get the generated id back right
/// away, the merge write runs in the background, and a rejection lands in the
/// error slot without rolling any local state back. The next snapshot from
/// the store silently settles whatever the truth is.
#[derive(Clone)]
pub struct OptimisticWriter {
    store: Store,
    errors: ErrorSlot,
}

impl OptimisticWriter {
    pub fn new(store: Store, errors: ErrorSlot) -> Self {
        Self { store, errors }
    }

    /// Sanitizes, assigns `{prefix}_{epochMillis}`, fires the write, returns
    /// the id immediately.
    pub fn create(
        &self,
        collection: &str,
        prefix: &str,
        fields: Fields,
        policy: FieldPolicy,
        stamp_field: &'static str,
    ) -> String {
        let doc_id = client_id(prefix);
        self.merge_with_stamps(collection, &doc_id, sanitize(&fields, policy), &[stamp_field]);
        doc_id
    }

    /// Fire-and-forget merge write to a known document id.
    pub fn merge_with_stamps(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Fields,
        stamp_fields: &[&'static str],
    ) {
        let store = self.store.clone();
        let errors = self.errors.clone();
        let collection = collection.to_string();
        let doc_id = doc_id.to_string();
        let stamp_fields = stamp_fields.to_vec();
        tokio::spawn(async move {
            if let Err(err) = store.merge_write(&collection, &doc_id, fields, &stamp_fields) {
                tracing::warn!(collection = %collection, doc_id = %doc_id, error = %err, "merge write rejected");
                errors.record(err.to_string());
            }
        });
    }

    /// Fire-and-forget delete.
    pub fn delete(&self, collection: &str, doc_id: &str) {
        let store = self.store.clone();
        let errors = self.errors.clone();
        let collection = collection.to_string();
        let doc_id = doc_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store.delete(&collection, &doc_id) {
                tracing::warn!(collection = %collection, doc_id = %doc_id, error = %err, "delete rejected");
                errors.record(err.to_string());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object;
    use serde_json::json;

    #[test]
    fn allowlist_strips_everything_else() {
        let raw = object(json!({
            "id": "groceries",
            "label": "Groceries",
            "emoji": "🛒",
            "icon": {"component": "ShoppingCart"},
            "onSelect": "[function]",
        }));
        let clean = sanitize(&raw, FieldPolicy::Allow(&["id", "label", "emoji"]));
        assert_eq!(clean.len(), 3);
        assert_eq!(clean.get("id"), Some(&json!("groceries")));
        assert_eq!(clean.get("label"), Some(&json!("Groceries")));
        assert_eq!(clean.get("emoji"), Some(&json!("🛒")));
        assert!(!clean.contains_key("icon"));
        assert!(!clean.contains_key("onSelect"));
    }

    #[test]
    fn relaxed_policy_drops_private_and_event_keys() {
        let raw = object(json!({
            "id": "dizziness",
            "intensity": 3,
            "_owner": "react",
            "nativeEvent": {},
            "target": {},
        }));
        let clean = sanitize(&raw, FieldPolicy::Relaxed);
        assert_eq!(clean.len(), 2);
        assert!(clean.contains_key("id"));
        assert!(clean.contains_key("intensity"));
    }

    #[test]
    fn client_ids_differ_across_milliseconds() {
        let first = client_id("ping");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = client_id("ping");
        assert!(first.starts_with("ping_"));
        // Writes more than 1ms apart must not collide; same-millisecond
        // writes may, and that is accepted.
        assert_ne!(first, second);
    }
}
