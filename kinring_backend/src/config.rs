use anyhow::{anyhow, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub paths: StorePaths,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        let paths = StorePaths::discover()?;
        Ok(Self { paths })
    }
}

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub blobs_dir: PathBuf,
}

impl StorePaths {
    /// Resolves the base directory from `KINRING_BASE_DIR`, falling back to the
    /// directory holding the current executable.
    pub fn discover() -> Result<Self> {
        if let Some(base) = env::var_os("KINRING_BASE_DIR") {
            return Self::from_base_dir(base);
        }
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("kinring.db");
        let blobs_dir = base.join("blobs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            blobs_dir,
        })
    }
}
