use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::ClientError;

/// What the client keeps between requests. Either half may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<StoredTokens, ClientError>;
    fn save(&self, tokens: &StoredTokens) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredTokens> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<StoredTokens, ClientError> {
        Ok(self.lock().clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), ClientError> {
        *self.lock() = tokens.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.lock() = StoredTokens::default();
        Ok(())
    }
}

/// JSON file, normally `<data_dir>/tokens.json`.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<StoredTokens, ClientError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredTokens::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(tokens)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("gastos").join("tokens.json"));
        assert_eq!(store.load().unwrap(), StoredTokens::default());

        let tokens = StoredTokens {
            access: Some("a".into()),
            refresh: Some("r".into()),
        };
        store.save(&tokens).unwrap();
        assert_eq!(store.load().unwrap(), tokens);

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), StoredTokens::default());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        store
            .save(&StoredTokens {
                access: None,
                refresh: Some("r".into()),
            })
            .unwrap();
        assert_eq!(store.load().unwrap().refresh.as_deref(), Some("r"));
        store.clear().unwrap();
        assert!(store.load().unwrap().refresh.is_none());
    }
}
