use anyhow::Result;
use kinring_backend::config::StorePaths;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct KinringConfig {
    pub paths: StorePaths,
}

impl KinringConfig {
    /// Resolves the store location from `KINRING_BASE_DIR`, falling back to
    /// the executable's directory.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            paths: StorePaths::discover()?,
        })
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        Ok(Self {
            paths: StorePaths::from_base_dir(base)?,
        })
    }
}
