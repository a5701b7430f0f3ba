use anyhow::{anyhow, Context, Result};
use blake3::Hasher;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Flat-file blob sidecar for photo and audio attachments. Blobs are written
/// under the caller-supplied storage path and checksummed with blake3.
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobRef {
    pub storage_path: String,
    pub checksum: String,
    pub mime: Option<String>,
    pub size_bytes: i64,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn put(&self, storage_path: &str, data: &[u8]) -> Result<BlobRef> {
        if data.is_empty() {
            return Err(anyhow!("blob data may not be empty"));
        }
        let absolute_path = self.resolve(storage_path)?;
        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create blob directory {}", parent.display()))?;
        }
        fs::write(&absolute_path, data)
            .await
            .with_context(|| format!("failed to write blob to {}", absolute_path.display()))?;

        let mut hasher = Hasher::new();
        hasher.update(data);
        let checksum = format!("blake3:{}", hasher.finalize().to_hex());
        let mime = infer::get(data).map(|kind| kind.mime_type().to_string());

        Ok(BlobRef {
            storage_path: storage_path.to_string(),
            checksum,
            mime,
            size_bytes: data.len() as i64,
        })
    }

    pub async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        let absolute_path = self.resolve(storage_path)?;
        fs::read(&absolute_path)
            .await
            .with_context(|| format!("failed to read blob at {}", absolute_path.display()))
    }

    /// Removes the blob; a missing file is not an error (the viewer may have
    /// deleted it already).
    pub async fn delete(&self, storage_path: &str) -> Result<()> {
        let absolute_path = self.resolve(storage_path)?;
        match fs::remove_file(&absolute_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to delete blob at {}", absolute_path.display())),
        }
    }

    pub async fn exists(&self, storage_path: &str) -> bool {
        match self.resolve(storage_path) {
            Ok(path) => fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    fn resolve(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(anyhow!("invalid blob storage path {storage_path}"));
        }
        Ok(self.root.join(relative))
    }
}
