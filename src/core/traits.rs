//! Filesystem layout of the data directory.

use std::path::PathBuf;

use crate::error::{AppError, AppResult};

pub trait StorageConfig: Send + Sync {
    fn data_dir(&self) -> PathBuf;

    fn db_path(&self) -> PathBuf {
        self.data_dir().join("gastos.db")
    }

    fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Where the CLI client keeps its access/refresh pair.
    fn tokens_path(&self) -> PathBuf {
        self.data_dir().join("tokens.json")
    }
}

/// Defaults to `~/.gastos/`.
#[derive(Debug, Clone)]
pub struct DefaultStorageConfig {
    data_dir: PathBuf,
}

impl DefaultStorageConfig {
    pub fn new() -> AppResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Unknown("Cannot resolve home directory".to_string()))?;
        Self::with_path(home.join(".gastos"))
    }

    pub fn with_path(data_dir: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(data_dir.join("logs")).map_err(|e| {
            AppError::Unknown(format!("Failed to create data dir {:?}: {}", data_dir, e))
        })?;
        Ok(Self { data_dir })
    }
}

impl StorageConfig for DefaultStorageConfig {
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}
