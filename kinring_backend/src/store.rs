use crate::blobs::BlobStore;
use crate::config::StorePaths;
use crate::database::Database;
use crate::document::{Document, Fields};
use crate::error::StoreError;
use crate::utils::now_utc_iso;
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Equality-query coverage. A lookup on any other (collection, field) pair
/// fails with `StoreError::MissingIndex`, mirroring how the hosted store
/// rejects unindexed queries. Must stay in sync with the expression indexes
/// declared in `database::MIGRATIONS`.
pub const INDEXED_FIELDS: &[(&str, &str)] = &[
    ("memberships", "userId"),
    ("memberships", "circleId"),
    ("circles", "inviteCode"),
];

#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Order newest-first by this field; falls back to server write time.
    pub order_field: Option<&'static str>,
    /// Retrieval window: only the most recent N items are materialized.
    pub limit: Option<usize>,
    /// Scope the view to documents whose field equals the given value.
    pub filter_equal: Option<(&'static str, String)>,
}

pub type SnapshotResult = Result<Vec<Document>, StoreError>;
pub type DocSnapshotResult = Result<Option<Document>, StoreError>;

enum WatcherSink {
    Collection(mpsc::UnboundedSender<SnapshotResult>),
    Doc(mpsc::UnboundedSender<DocSnapshotResult>),
}

struct Watcher {
    id: u64,
    collection: String,
    doc_id: Option<String>,
    spec: QuerySpec,
    sink: WatcherSink,
}

struct StoreInner {
    database: Database,
    blobs: BlobStore,
    watchers: Mutex<Vec<Watcher>>,
    next_watcher_id: AtomicU64,
    online: AtomicBool,
}

/// Cloneable handle to the document store and its blob sidecar. The store is
/// the sole ordering authority: every snapshot a watcher receives is a full
/// rematerialized list, never a diff.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn open(paths: &StorePaths) -> Result<Self> {
        let database = Database::connect(paths)?;
        database.ensure_migrations()?;
        let blobs = BlobStore::new(&paths.blobs_dir);
        tracing::info!(db_path = %paths.db_path.display(), "document store opened");
        Ok(Self::from_parts(database, blobs))
    }

    /// In-memory store for tests and the scripted demo; blobs still need a
    /// directory on disk.
    pub fn open_in_memory(blobs_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().context("open in-memory store")?;
        let database = Database::from_connection(conn);
        database.ensure_migrations()?;
        Ok(Self::from_parts(database, BlobStore::new(blobs_dir)))
    }

    fn from_parts(database: Database, blobs: BlobStore) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                database,
                blobs,
                watchers: Mutex::new(Vec::new()),
                next_watcher_id: AtomicU64::new(1),
                online: AtomicBool::new(true),
            }),
        }
    }

    pub fn blobs(&self) -> BlobStore {
        self.inner.blobs.clone()
    }

    /// Merges `fields` into the document, creating it when absent. Every field
    /// named in `stamp_fields` is overwritten with the server-assigned write
    /// timestamp. Last write wins; there are no version checks.
    pub fn merge_write(
        &self,
        collection: &str,
        doc_id: &str,
        mut fields: Fields,
        stamp_fields: &[&str],
    ) -> Result<String, StoreError> {
        self.ensure_online()?;
        let write_time = now_utc_iso();
        for key in stamp_fields {
            fields.insert((*key).to_string(), Value::String(write_time.clone()));
        }
        self.inner
            .database
            .merge_document(collection, doc_id, &fields, &write_time)?;
        tracing::debug!(collection, doc_id, "merge write applied");
        self.notify(collection, doc_id);
        Ok(write_time)
    }

    pub fn delete(&self, collection: &str, doc_id: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let removed = self.inner.database.delete_document(collection, doc_id)?;
        if removed {
            tracing::debug!(collection, doc_id, "document deleted");
            self.notify(collection, doc_id);
        }
        Ok(())
    }

    pub fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self.inner.database.get_document(collection, doc_id)?)
    }

    /// Indexed equality lookup. Unindexed (collection, field) pairs error.
    pub fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        if !is_indexed(collection, field) {
            return Err(StoreError::MissingIndex {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }
        Ok(self
            .inner
            .database
            .list_query(collection, None, None, Some((field, value)))?)
    }

    /// Full collection scan. Only the documented resolution fallback should
    /// reach for this; it is O(collection size).
    pub fn list_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        Ok(self.inner.database.list_query(collection, None, None, None)?)
    }

    /// Opens a live collection view. The complete materialized list is
    /// delivered immediately and again after every write or delete touching
    /// the collection. Errors arrive in-band and end the subscription; this
    /// layer never retries.
    pub fn subscribe(
        &self,
        collection: &str,
        spec: QuerySpec,
    ) -> (mpsc::UnboundedReceiver<SnapshotResult>, SubscriptionGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_online() {
            let _ = tx.send(Err(StoreError::Offline));
            return (rx, SubscriptionGuard::released());
        }
        if let Some((field, _)) = &spec.filter_equal {
            if !is_indexed(collection, field) {
                let _ = tx.send(Err(StoreError::MissingIndex {
                    collection: collection.to_string(),
                    field: field.to_string(),
                }));
                return (rx, SubscriptionGuard::released());
            }
        }
        let watcher = Watcher {
            id: self.inner.next_watcher_id.fetch_add(1, Ordering::SeqCst),
            collection: collection.to_string(),
            doc_id: None,
            spec,
            sink: WatcherSink::Collection(tx),
        };
        let guard = self.register(watcher);
        (rx, guard)
    }

    /// Single-document live view (e.g. the circle check-in slot).
    pub fn subscribe_doc(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> (mpsc::UnboundedReceiver<DocSnapshotResult>, SubscriptionGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_online() {
            let _ = tx.send(Err(StoreError::Offline));
            return (rx, SubscriptionGuard::released());
        }
        let watcher = Watcher {
            id: self.inner.next_watcher_id.fetch_add(1, Ordering::SeqCst),
            collection: collection.to_string(),
            doc_id: Some(doc_id.to_string()),
            spec: QuerySpec::default(),
            sink: WatcherSink::Doc(tx),
        };
        let guard = self.register(watcher);
        (rx, guard)
    }

    /// Takes the store offline: live subscriptions receive a final offline
    /// error and end; subsequent operations fail until the process restarts.
    pub fn shutdown(&self) {
        if !self.inner.online.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("store shutting down, ending live subscriptions");
        if let Ok(mut watchers) = self.inner.watchers.lock() {
            for watcher in watchers.drain(..) {
                match watcher.sink {
                    WatcherSink::Collection(tx) => {
                        let _ = tx.send(Err(StoreError::Offline));
                    }
                    WatcherSink::Doc(tx) => {
                        let _ = tx.send(Err(StoreError::Offline));
                    }
                }
            }
        }
    }

    /// Delivers the initial snapshot, then tracks the watcher for change
    /// notifications.
    fn register(&self, watcher: Watcher) -> SubscriptionGuard {
        self.deliver(&watcher);
        let id = watcher.id;
        if let Ok(mut watchers) = self.inner.watchers.lock() {
            watchers.push(watcher);
        }
        SubscriptionGuard {
            inner: Arc::downgrade(&self.inner),
            id,
            released: AtomicBool::new(false),
        }
    }

    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Offline)
        }
    }

    fn notify(&self, collection: &str, doc_id: &str) {
        let Ok(mut watchers) = self.inner.watchers.lock() else {
            return;
        };
        watchers.retain(|watcher| {
            if watcher.collection != collection {
                return true;
            }
            if let Some(target) = &watcher.doc_id {
                if target != doc_id {
                    return true;
                }
            }
            self.deliver(watcher)
        });
    }

    /// Sends the watcher its current materialized view; returns false when the
    /// receiving side is gone so the watcher can be dropped.
    fn deliver(&self, watcher: &Watcher) -> bool {
        match &watcher.sink {
            WatcherSink::Collection(tx) => {
                let filter = watcher
                    .spec
                    .filter_equal
                    .as_ref()
                    .map(|(field, value)| (*field, value.as_str()));
                let payload = self
                    .inner
                    .database
                    .list_query(
                        &watcher.collection,
                        watcher.spec.order_field,
                        watcher.spec.limit,
                        filter,
                    )
                    .map_err(StoreError::from);
                tx.send(payload).is_ok()
            }
            WatcherSink::Doc(tx) => {
                let doc_id = watcher.doc_id.as_deref().unwrap_or_default();
                let payload = self
                    .inner
                    .database
                    .get_document(&watcher.collection, doc_id)
                    .map_err(StoreError::from);
                tx.send(payload).is_ok()
            }
        }
    }
}

fn is_indexed(collection: &str, field: &str) -> bool {
    INDEXED_FIELDS
        .iter()
        .any(|(c, f)| *c == collection && *f == field)
}

/// Handle that releases the store-side watcher. Exactly one release happens
/// per subscription: explicit `unsubscribe` calls after the first are no-ops,
/// and dropping the guard releases if the caller never did.
pub struct SubscriptionGuard {
    inner: Weak<StoreInner>,
    id: u64,
    released: AtomicBool,
}

impl SubscriptionGuard {
    fn released() -> Self {
        Self {
            inner: Weak::new(),
            id: 0,
            released: AtomicBool::new(true),
        }
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut watchers) = inner.watchers.lock() {
                watchers.retain(|watcher| watcher.id != self.id);
            }
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn setup_store() -> (Store, tempfile::TempDir) {
        let temp = tempdir().expect("tempdir");
        let store = Store::open_in_memory(temp.path().join("blobs")).expect("store");
        (store, temp)
    }

    #[test]
    fn subscription_delivers_full_ordered_snapshots() {
        let (store, _temp) = setup_store();
        let (mut rx, _guard) = store.subscribe(
            "circles/c1/pings",
            QuerySpec {
                order_field: Some("sentAt"),
                limit: Some(10),
                filter_equal: None,
            },
        );

        let initial = rx.try_recv().expect("initial snapshot").expect("ok");
        assert!(initial.is_empty());

        store
            .merge_write(
                "circles/c1/pings",
                "ping_1",
                fields(json!({"fromName": "Astrid", "sentAt": "2026-08-07T10:00:01.000Z"})),
                &[],
            )
            .unwrap();
        let snapshot = rx.try_recv().expect("snapshot").expect("ok");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].str_field("fromName"), Some("Astrid"));

        store
            .merge_write(
                "circles/c1/pings",
                "ping_2",
                fields(json!({"fromName": "Bjorn", "sentAt": "2026-08-07T10:00:02.000Z"})),
                &[],
            )
            .unwrap();
        let snapshot = rx.try_recv().expect("snapshot").expect("ok");
        assert_eq!(snapshot.len(), 2);
        // Newest first.
        assert_eq!(snapshot[0].id, "ping_2");
        assert_eq!(snapshot[1].id, "ping_1");
    }

    #[test]
    fn unsubscribe_twice_is_a_noop() {
        let (store, _temp) = setup_store();
        let (mut rx, guard) = store.subscribe("circles/c1/pings", QuerySpec::default());
        let _ = rx.try_recv().expect("initial snapshot");

        guard.unsubscribe();
        guard.unsubscribe();

        store
            .merge_write(
                "circles/c1/pings",
                "ping_1",
                fields(json!({"fromName": "Astrid"})),
                &["sentAt"],
            )
            .unwrap();
        // Watcher is gone, so the channel is closed and nothing was delivered.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn filtered_subscription_scopes_to_matching_documents() {
        let (store, _temp) = setup_store();
        let (mut rx, _guard) = store.subscribe(
            "memberships",
            QuerySpec {
                order_field: None,
                limit: None,
                filter_equal: Some(("circleId", "c1".to_string())),
            },
        );
        let _ = rx.try_recv().expect("initial snapshot");

        store
            .merge_write(
                "memberships",
                "c2_u9",
                fields(json!({"circleId": "c2", "userId": "u9"})),
                &["joinedAt"],
            )
            .unwrap();
        let snapshot = rx.try_recv().expect("snapshot").expect("ok");
        assert!(snapshot.is_empty());

        store
            .merge_write(
                "memberships",
                "c1_u1",
                fields(json!({"circleId": "c1", "userId": "u1"})),
                &["joinedAt"],
            )
            .unwrap();
        let snapshot = rx.try_recv().expect("snapshot").expect("ok");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "c1_u1");
    }

    #[test]
    fn unindexed_equality_query_errors() {
        let (store, _temp) = setup_store();
        let err = store
            .query_equal("memberships", "displayName", "Astrid")
            .unwrap_err();
        assert!(err.to_string().contains("index"));
    }

    #[test]
    fn doc_subscription_tracks_a_single_document() {
        let (store, _temp) = setup_store();
        let (mut rx, _guard) = store.subscribe_doc("circles/c1/settings", "checkIn");
        let initial = rx.try_recv().expect("initial").expect("ok");
        assert!(initial.is_none());

        store
            .merge_write("circles/c1/settings", "main", Fields::new(), &["lastUpdated"])
            .unwrap();
        // A different document in the same collection does not wake the watcher.
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));

        store
            .merge_write("circles/c1/settings", "checkIn", Fields::new(), &["lastCheckIn"])
            .unwrap();
        let snapshot = rx.try_recv().expect("snapshot").expect("ok").expect("doc");
        assert!(snapshot.has_value("lastCheckIn"));
    }

    #[test]
    fn shutdown_ends_subscriptions_and_rejects_writes() {
        let (store, _temp) = setup_store();
        let (mut rx, _guard) = store.subscribe("circles/c1/pings", QuerySpec::default());
        let _ = rx.try_recv().expect("initial snapshot");

        store.shutdown();
        let final_event = rx.try_recv().expect("offline event");
        assert!(matches!(final_event, Err(StoreError::Offline)));

        let err = store
            .merge_write("circles/c1/pings", "ping_1", Fields::new(), &["sentAt"])
            .unwrap_err();
        assert!(err.to_string().contains("offline"));
    }
}
