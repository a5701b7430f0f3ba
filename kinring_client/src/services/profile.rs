use crate::error::{classify, ErrorSlot, SyncError};
use crate::models::{object, Role, UserProfile};
use kinring_backend::Store;
use serde_json::json;
use std::time::Duration;

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// User profile documents. The fetch path is the only place in the client
/// that retries: a profile read can race store startup, so offline failures
/// get a bounded exponential backoff. Everything else fails fast.
pub struct UserProfileService {
    store: Store,
    errors: ErrorSlot,
}

impl UserProfileService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            errors: ErrorSlot::default(),
        }
    }

    pub async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, SyncError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.store.get("profiles", user_id) {
                Ok(doc) => {
                    self.errors.clear();
                    return Ok(doc.as_ref().and_then(UserProfile::from_document));
                }
                Err(err) => {
                    let classified = classify(&err);
                    if classified == SyncError::Offline && attempt < FETCH_ATTEMPTS {
                        tracing::warn!(
                            attempt,
                            of = FETCH_ATTEMPTS,
                            user_id,
                            "profile fetch failed while offline, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        attempt += 1;
                    } else {
                        self.errors.record(classified.to_string());
                        return Err(classified);
                    }
                }
            }
        }
    }

    pub fn create_profile(
        &self,
        user_id: &str,
        display_name: &str,
        role: Role,
    ) -> Result<(), SyncError> {
        self.store
            .merge_write(
                "profiles",
                user_id,
                object(json!({
                    "displayName": display_name,
                    "role": role.as_str(),
                })),
                &["createdAt"],
            )
            .map(|_| ())
            .map_err(|err| {
                let classified = classify(&err);
                self.errors.record(classified.to_string());
                classified
            })
    }

    pub fn update_role(&self, user_id: &str, role: Role) -> Result<(), SyncError> {
        self.store
            .merge_write(
                "profiles",
                user_id,
                object(json!({"role": role.as_str()})),
                &[],
            )
            .map(|_| ())
            .map_err(|err| {
                let classified = classify(&err);
                self.errors.record(classified.to_string());
                classified
            })
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
