use crate::error::ErrorSlot;
use crate::sync::mirror::Mirror;
use kinring_backend::{Document, QuerySpec, Store, SubscriptionGuard};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Live view of one collection, scoped by a circle that may not exist yet.
///
/// With a collection the store subscription stays open until this value is
/// dropped or `close` is called; every delivered snapshot replaces the mirror
/// wholesale. Without one (no circle resolved) the mirror clears and settles
/// "not loading" as an async completion rather than inline, so observers see
/// the same deferred ordering either way.
pub struct ScopedSubscription<T> {
    mirror: Arc<Mirror<T>>,
    errors: ErrorSlot,
    guard: Option<SubscriptionGuard>,
    _task: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + Sync + 'static> ScopedSubscription<T> {
    pub fn open<F>(
        store: &Store,
        collection: Option<String>,
        spec: QuerySpec,
        errors: ErrorSlot,
        map: F,
    ) -> Self
    where
        F: Fn(&Document) -> Option<T> + Send + Sync + 'static,
    {
        let mirror = Arc::new(Mirror::new());

        let Some(collection) = collection else {
            let cleared = mirror.clone();
            let task = tokio::spawn(async move {
                cleared.clear();
            });
            return Self {
                mirror,
                errors,
                guard: None,
                _task: Some(task),
            };
        };

        let (mut rx, guard) = store.subscribe(&collection, spec);
        let task_mirror = mirror.clone();
        let task_errors = errors.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                match snapshot {
                    Ok(docs) => {
                        task_mirror.replace(docs.iter().filter_map(|doc| map(doc)).collect());
                    }
                    Err(err) => {
                        tracing::warn!(collection = %collection, error = %err, "subscription failed");
                        task_errors.record(err.to_string());
                        task_mirror.finish_loading();
                    }
                }
            }
        });

        Self {
            mirror,
            errors,
            guard: Some(guard),
            _task: Some(task),
        }
    }

    pub fn mirror(&self) -> Arc<Mirror<T>> {
        self.mirror.clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.mirror.items()
    }

    pub fn loading(&self) -> bool {
        self.mirror.loading()
    }

    pub fn errors(&self) -> ErrorSlot {
        self.errors.clone()
    }

    /// Releases the store-side watcher. Safe to call more than once; the drop
    /// impl covers callers that never do.
    pub fn close(&self) {
        if let Some(guard) = &self.guard {
            guard.unsubscribe();
        }
    }
}

impl<T> Drop for ScopedSubscription<T> {
    fn drop(&mut self) {
        if let Some(guard) = &self.guard {
            guard.unsubscribe();
        }
    }
}
