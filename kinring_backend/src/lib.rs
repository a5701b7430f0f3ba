pub mod blobs;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod store;
pub mod utils;

pub use blobs::{BlobRef, BlobStore};
pub use document::{Document, Fields};
pub use error::StoreError;
pub use store::{QuerySpec, Store, SubscriptionGuard};
