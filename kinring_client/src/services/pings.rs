use crate::error::ErrorSlot;
use crate::models::{object, Ping, Role, UserIdentity};
use crate::services::circle_collection;
use crate::sync::partition;
use crate::sync::subscriber::ScopedSubscription;
use crate::sync::writer::{FieldPolicy, OptimisticWriter};
use chrono::{Duration, Utc};
use kinring_backend::{QuerySpec, Store};
use serde_json::json;
use std::sync::{Arc, Mutex};

pub const PING_WINDOW: usize = 10;
/// A ping counts as "for me, right now" only this long after it was sent.
pub const PING_FRESHNESS_SECONDS: i64 = 60;

/// "Thinking of you" pings. The latest-slot is the only dismiss state: it
/// holds at most one ping and a dismiss clears it.
pub struct PingService {
    identity: UserIdentity,
    collection: Option<String>,
    subscription: ScopedSubscription<Ping>,
    writer: OptimisticWriter,
    latest: Arc<Mutex<Option<Ping>>>,
    errors: ErrorSlot,
}

impl PingService {
    pub fn new(store: &Store, identity: UserIdentity, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let collection = circle_id.map(|id| circle_collection(id, "pings"));
        let subscription = ScopedSubscription::open(
            store,
            collection.clone(),
            QuerySpec {
                order_field: Some("sentAt"),
                limit: Some(PING_WINDOW),
                filter_equal: None,
            },
            errors.clone(),
            Ping::from_document,
        );

        let latest = Arc::new(Mutex::new(None));
        // Re-derive the latest unread ping on every snapshot; replace only
        // when a different ping shows up, so a dismissed one is not re-raised
        // by unrelated churn.
        let mirror = subscription.mirror();
        let me = identity.user_id.clone();
        let slot = latest.clone();
        tokio::spawn(async move {
            let mut rx = mirror.watch();
            loop {
                let items = rx.borrow_and_update().items.clone();
                let candidate = partition::latest_unread(
                    &items,
                    Utc::now(),
                    Duration::seconds(PING_FRESHNESS_SECONDS),
                    |ping: &Ping| ping.from_user_id == me,
                    |ping| ping.sent_at,
                )
                .cloned();
                if let Some(candidate) = candidate {
                    if let Ok(mut current) = slot.lock() {
                        let replace = current
                            .as_ref()
                            .map(|latest: &Ping| latest.doc_id != candidate.doc_id)
                            .unwrap_or(true);
                        if replace {
                            *current = Some(candidate);
                        }
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            writer: OptimisticWriter::new(store.clone(), errors.clone()),
            identity,
            collection,
            subscription,
            latest,
            errors,
        }
    }

    /// Sends a ping to every member of the target role. Fire-and-forget: the
    /// id comes back immediately.
    pub fn send_ping(&self, to_role: Role) -> Option<String> {
        let collection = self.collection.as_ref()?;
        Some(self.writer.create(
            collection,
            "ping",
            object(json!({
                "fromName": self.identity.display_name,
                "fromUserId": self.identity.user_id,
                "toRole": to_role.as_str(),
            })),
            FieldPolicy::Allow(&["fromName", "fromUserId", "toRole"]),
            "sentAt",
        ))
    }

    pub fn pings(&self) -> Vec<Ping> {
        self.subscription.items()
    }

    pub fn latest(&self) -> Option<Ping> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn dismiss(&self) {
        if let Ok(mut slot) = self.latest.lock() {
            *slot = None;
        }
    }

    pub fn loading(&self) -> bool {
        self.subscription.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
