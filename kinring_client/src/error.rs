use kinring_backend::StoreError;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const INVALID_CODE_MESSAGE: &str = "Invalid invite code.";

/// Client-side failure taxonomy. Variants carry the pre-written user-facing
/// message; raw backend detail goes to the log, not the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Caught before any store round-trip; surfaced inline.
    #[error("{0}")]
    Validation(String),

    /// The store reported a missing index; the deployment needs attention.
    #[error("Database index missing. Contact support.")]
    Configuration,

    /// Connectivity failure. Only the profile fetch path retries on this.
    #[error("Connection appears to be offline.")]
    Offline,

    /// Anything else the store rejected; last error wins per service.
    #[error("{0}")]
    Store(String),
}

/// Substring classification of store failures, the same way the hooks sorted
/// raw backend messages.
pub fn classify(err: &StoreError) -> SyncError {
    let message = err.to_string();
    if message.contains("index") {
        SyncError::Configuration
    } else if message.contains("offline") {
        SyncError::Offline
    } else {
        SyncError::Store(message)
    }
}

/// Per-service error slot: last write wins, no queue, no aggregation across
/// services.
#[derive(Clone, Default)]
pub struct ErrorSlot(Arc<Mutex<Option<String>>>);

impl ErrorSlot {
    pub fn record(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(message.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<String> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}
