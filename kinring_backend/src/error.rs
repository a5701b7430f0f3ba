use thiserror::Error;

/// Failures surfaced by the document store. Clients classify these by message
/// substring (`"offline"`, `"index"`), so the wording of the first two
/// variants is load-bearing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is offline")]
    Offline,

    #[error("no index configured for {collection}.{field}")]
    MissingIndex { collection: String, field: String },

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
