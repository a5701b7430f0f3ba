use crate::error::ErrorSlot;
use crate::services::circle_collection;
use crate::sync::writer::OptimisticWriter;
use chrono::{DateTime, Local, Utc};
use kinring_backend::{Fields, Store, SubscriptionGuard};
use std::sync::{Arc, Mutex};

/// Tracks when the senior last checked in, visible to relatives. Backed by a
/// single live document rather than a collection.
pub struct CheckInService {
    collection: Option<String>,
    writer: OptimisticWriter,
    last_check_in: Arc<Mutex<Option<DateTime<Utc>>>>,
    errors: ErrorSlot,
    _guard: Option<SubscriptionGuard>,
}

impl CheckInService {
    pub fn new(store: &Store, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let collection = circle_id.map(|id| circle_collection(id, "settings"));
        let last_check_in = Arc::new(Mutex::new(None));

        let guard = collection.as_ref().map(|collection| {
            let (mut rx, guard) = store.subscribe_doc(collection, "checkIn");
            let slot = last_check_in.clone();
            let task_errors = errors.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        Ok(Some(doc)) => {
                            if let Ok(mut current) = slot.lock() {
                                *current = doc.timestamp_field("lastCheckIn");
                            }
                        }
                        // Absent document is normal for new circles.
                        Ok(None) => {
                            if let Ok(mut current) = slot.lock() {
                                *current = None;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "check-in subscription failed");
                            task_errors.record(err.to_string());
                        }
                    }
                }
            });
            guard
        });

        Self {
            writer: OptimisticWriter::new(store.clone(), errors.clone()),
            collection,
            last_check_in,
            errors,
            _guard: guard,
        }
    }

    /// Records "I'm okay" with the server's timestamp.
    pub fn record_check_in(&self) {
        let Some(collection) = &self.collection else {
            return;
        };
        self.writer
            .merge_with_stamps(collection, "checkIn", Fields::new(), &["lastCheckIn"]);
    }

    pub fn last_check_in(&self) -> Option<DateTime<Utc>> {
        self.last_check_in.lock().ok().and_then(|slot| *slot)
    }

    /// Wall-clock label ("14:32") for display, in the viewer's timezone.
    pub fn last_check_in_label(&self) -> Option<String> {
        self.last_check_in()
            .map(|ts| ts.with_timezone(&Local).format("%H:%M").to_string())
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
