use crate::error::ErrorSlot;
use crate::models::{object, MemberStatus, Role, UserIdentity};
use crate::services::circle_collection;
use crate::sync::partition;
use crate::sync::subscriber::ScopedSubscription;
use crate::sync::writer::OptimisticWriter;
use kinring_backend::{QuerySpec, Store};
use serde_json::json;
use std::sync::{Arc, Mutex};

const DEFAULT_STATUS: &str = "home";

/// Per-member status tracking. Each member's status lives in its own document
/// keyed by user id, visible to everyone in the circle.
pub struct MemberStatusService {
    identity: UserIdentity,
    collection: Option<String>,
    subscription: ScopedSubscription<MemberStatus>,
    writer: OptimisticWriter,
    my_status: Arc<Mutex<String>>,
    errors: ErrorSlot,
}

impl MemberStatusService {
    pub fn new(store: &Store, identity: UserIdentity, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let collection = circle_id.map(|id| circle_collection(id, "memberStatuses"));
        let subscription = ScopedSubscription::open(
            store,
            collection.clone(),
            QuerySpec::default(),
            errors.clone(),
            MemberStatus::from_document,
        );

        let my_status = Arc::new(Mutex::new(DEFAULT_STATUS.to_string()));
        // Keep my own status in step with the mirrored data.
        let mirror = subscription.mirror();
        let me = identity.user_id.clone();
        let slot = my_status.clone();
        tokio::spawn(async move {
            let mut rx = mirror.watch();
            loop {
                let mine = rx
                    .borrow_and_update()
                    .items
                    .iter()
                    .find(|status| status.user_id == me)
                    .map(|status| status.status.clone());
                if let Some(status) = mine {
                    if let Ok(mut current) = slot.lock() {
                        *current = status;
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
            my_status,
            errors,
        }
    }

    /// Optimistic: local state flips immediately, the merge write follows and
    /// is never rolled back on rejection.
    pub fn set_my_status(&self, status: &str) {
        if let Ok(mut current) = self.my_status.lock() {
            *current = status.to_string();
        }
        let Some(collection) = &self.collection else {
            return;
        };
        self.writer.merge_with_stamps(
            collection,
            &self.identity.user_id,
            object(json!({
                "status": status,
                "displayName": self.identity.display_name,
                "role": self.identity.role.as_str(),
            })),
            &["updatedAt"],
        );
    }

    pub fn my_status(&self) -> String {
        self.my_status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_else(|_| DEFAULT_STATUS.to_string())
    }

    /// All members' statuses, as of the last snapshot.
    pub fn statuses(&self) -> Vec<MemberStatus> {
        self.subscription.items()
    }

    /// Only relatives, for the senior's view.
    pub fn relative_statuses(&self) -> Vec<MemberStatus> {
        partition::role_subset(&self.statuses(), Role::Relative, |status| status.role)
    }

    /// Only the senior, for the relatives' view.
    pub fn senior_status(&self) -> Option<MemberStatus> {
        partition::find_by_role(&self.statuses(), Role::Senior, |status| status.role).cloned()
    }

    pub fn loading(&self) -> bool {
        self.subscription.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
