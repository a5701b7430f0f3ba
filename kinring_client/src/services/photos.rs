use crate::error::{classify, ErrorSlot, SyncError};
use crate::models::{object, Photo, UserIdentity};
use crate::services::circle_collection;
use crate::sync::partition;
use crate::sync::subscriber::ScopedSubscription;
use crate::sync::writer::OptimisticWriter;
use kinring_backend::{BlobStore, QuerySpec, Store};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const PHOTO_WINDOW: usize = 5;

/// Ephemeral photo sharing: blobs land in the blob store, metadata in the
/// circle's photos collection, and the viewer deletes the photo after seeing
/// it.
pub struct PhotoService {
    store: Store,
    blobs: BlobStore,
    identity: UserIdentity,
    circle_id: Option<String>,
    collection: Option<String>,
    subscription: ScopedSubscription<Photo>,
    writer: OptimisticWriter,
    uploading: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Photo>>>,
    errors: ErrorSlot,
}

impl PhotoService {
    pub fn new(store: &Store, identity: UserIdentity, circle_id: Option<&str>) -> Self {
        let errors = ErrorSlot::default();
        let collection = circle_id.map(|id| circle_collection(id, "photos"));
        let subscription = ScopedSubscription::open(
            store,
            collection.clone(),
            QuerySpec {
                order_field: Some("uploadedAt"),
                limit: Some(PHOTO_WINDOW),
                filter_equal: None,
            },
            errors.clone(),
            Photo::from_document,
        );

        let latest = Arc::new(Mutex::new(None));
        // The latest slot always reflects the current snapshot: first
        // unviewed photo from someone else, or nothing.
        let mirror = subscription.mirror();
        let me = identity.user_id.clone();
        let slot = latest.clone();
        tokio::spawn(async move {
            let mut rx = mirror.watch();
            loop {
                let items = rx.borrow_and_update().items.clone();
                let candidate = partition::first_unviewed(
                    &items,
                    |photo: &Photo| photo.from_user_id == me,
                    |photo| photo.viewed,
                )
                .cloned();
                if let Ok(mut current) = slot.lock() {
                    *current = candidate;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            store: store.clone(),
            blobs: store.blobs(),
            writer: OptimisticWriter::new(store.clone(), errors.clone()),
            identity,
            circle_id: circle_id.map(str::to_string),
            collection,
            subscription,
            uploading: Arc::new(AtomicBool::new(false)),
            latest,
            errors,
        }
    }

    pub fn uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Uploads the image bytes and publishes the photo document. Unlike the
    /// item writers this one is awaited end-to-end so the uploading flag
    /// brackets the whole transfer.
    pub async fn upload_photo(&self, data: &[u8], from_name: &str) -> Result<String, SyncError> {
        let (Some(circle_id), Some(collection)) = (&self.circle_id, &self.collection) else {
            return Err(SyncError::Validation("No circle joined yet.".into()));
        };
        if data.is_empty() {
            return Err(SyncError::Validation("Photo data may not be empty.".into()));
        }

        self.uploading.store(true, Ordering::SeqCst);
        self.errors.clear();
        let photo_id = crate::sync::writer::client_id("photo");
        // Stored under a .jpg name regardless; the blob store records the
        // sniffed mime type alongside.
        let storage_path = format!("circles/{circle_id}/photos/{photo_id}.jpg");

        let blob = match self.blobs.put(&storage_path, data).await {
            Ok(blob) => blob,
            Err(err) => {
                self.uploading.store(false, Ordering::SeqCst);
                let failed = SyncError::Store(err.to_string());
                self.errors.record(failed.to_string());
                return Err(failed);
            }
        };

        let outcome = self.store.merge_write(
            collection,
            &photo_id,
            object(json!({
                "storagePath": blob.storage_path,
                "fromUserId": self.identity.user_id,
                "fromName": if from_name.trim().is_empty() { "Family" } else { from_name },
                "mime": blob.mime,
                "sizeBytes": blob.size_bytes,
                "checksum": blob.checksum,
                "viewedAt": null,
            })),
            &["uploadedAt"],
        );
        self.uploading.store(false, Ordering::SeqCst);
        match outcome {
            Ok(_) => Ok(photo_id),
            Err(err) => {
                let classified = classify(&err);
                self.errors.record(classified.to_string());
                Err(classified)
            }
        }
    }

    /// Removes the photo once the viewer closes it. A blob that is already
    /// gone is ignored.
    pub async fn delete_photo(
        &self,
        doc_id: &str,
        storage_path: Option<&str>,
    ) -> Result<(), SyncError> {
        if let Some(path) = storage_path {
            if let Err(err) = self.blobs.delete(path).await {
                tracing::warn!(path, error = %err, "blob delete failed, continuing");
            }
        }
        let Some(collection) = &self.collection else {
            return Ok(());
        };
        self.store.delete(collection, doc_id).map_err(|err| {
            let classified = classify(&err);
            self.errors.record(classified.to_string());
            classified
        })?;
        if let Ok(mut slot) = self.latest.lock() {
            if slot.as_ref().map(|photo| photo.doc_id == doc_id).unwrap_or(false) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Stamps the viewed marker before the viewer deletes the photo.
    pub fn mark_viewed(&self, doc_id: &str) {
        let Some(collection) = &self.collection else {
            return;
        };
        self.writer
            .merge_with_stamps(collection, doc_id, kinring_backend::Fields::new(), &["viewedAt"]);
    }

    pub fn photos(&self) -> Vec<Photo> {
        self.subscription.items()
    }

    pub fn latest(&self) -> Option<Photo> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn loading(&self) -> bool {
        self.subscription.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }
}
