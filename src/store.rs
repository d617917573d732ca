//! Persistent key-value store for user-added models and settings

use crate::error::{ManagerError, ManagerResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Keys used by the manager
pub mod keys {
    /// `Vec<Model>` added from remote URLs
    pub const CUSTOM_MODELS: &str = "custom_models";
    /// `Vec<Model>` added from local files
    pub const LOCAL_MODELS: &str = "local_models";
    /// `InferenceParams`
    pub const PARAMS: &str = "params";
    /// `bool`, set once the welcome screen was dismissed
    pub const WELCOME: &str = "welcome";
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Replace the value stored under `key`
    async fn save(&self, key: &str, content: &str) -> Result<()>;

    /// Load the value stored under `key`
    /// Returns None if nothing is stored
    async fn load(&self, key: &str) -> Result<Option<String>>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Stores each key as `<dir>/<key>.json`
pub struct FileSystemStorage {
    dir: PathBuf,
}

impl FileSystemStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            anyhow::bail!("Invalid store key: {:?}", key);
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, key: &str, content: &str) -> Result<()> {
        let path = self.path_for(key)?;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create store directory: {:?}", self.dir))?;

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp store file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write store file")?;
        file.sync_all().await.context("Failed to sync store file")?;

        fs::rename(&temp_file, &path)
            .await
            .context("Failed to rename temp store file")?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;

        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read store file: {:?}", path)),
        }
    }
}

// ============================================================================
// Typed store
// ============================================================================

/// Typed JSON values over a storage backend.
///
/// Loads never fail: a missing, unreadable or corrupt entry yields the
/// caller's default. Saves replace the whole value.
#[derive(Clone)]
pub struct KvStore {
    storage: Arc<dyn StorageBackend>,
}

impl KvStore {
    /// Create a store backed by files in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::new_with_storage(Arc::new(FileSystemStorage::new(dir)))
    }

    /// Create a store with a custom storage backend
    pub fn new_with_storage(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Load `key`, falling back to `default`
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let content = match self.storage.load(key).await {
            Ok(Some(content)) => content,
            Ok(None) => return default,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read stored value, using default");
                return default;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Stored value is corrupt, using default");
                default
            }
        }
    }

    /// Overwrite `key` with `value`
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ManagerResult<()> {
        let content = serde_json::to_string(value)
            .map_err(|e| ManagerError::Storage(format!("Failed to serialize {}: {}", key, e)))?;

        self.storage
            .save(key, &content)
            .await
            .map_err(|e| ManagerError::Storage(format!("{:#}", e)))?;

        tracing::debug!(key = %key, bytes = content.len(), "Value saved");

        Ok(())
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InferenceParams, Model};
    use mocks::MockStorage;
    use tempfile::TempDir;

    fn mock_store() -> (KvStore, Arc<MockStorage>) {
        let storage = Arc::new(MockStorage::new());
        (KvStore::new_with_storage(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_load_missing_returns_default() {
        let (store, _) = mock_store();
        let models: Vec<Model> = store.load(keys::CUSTOM_MODELS, Vec::new()).await;
        assert!(models.is_empty());
        assert!(!store.load(keys::WELCOME, false).await);
    }

    #[tokio::test]
    async fn test_save_and_load_with_mock() {
        let (store, storage) = mock_store();
        let models = vec![Model::custom("https://h/a.gguf", 42)];

        store.save(keys::CUSTOM_MODELS, &models).await.unwrap();

        assert_eq!(storage.key_count().await, 1);
        let loaded: Vec<Model> = store.load(keys::CUSTOM_MODELS, Vec::new()).await;
        assert_eq!(loaded, models);
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_value() {
        let (store, _) = mock_store();
        store
            .save(keys::LOCAL_MODELS, &vec![Model::local("a", 1), Model::local("b", 2)])
            .await
            .unwrap();
        store
            .save(keys::LOCAL_MODELS, &vec![Model::local("c", 3)])
            .await
            .unwrap();

        let loaded: Vec<Model> = store.load(keys::LOCAL_MODELS, Vec::new()).await;
        assert_eq!(loaded, vec![Model::local("c", 3)]);
    }

    #[tokio::test]
    async fn test_corrupt_value_returns_default() {
        let (store, storage) = mock_store();
        storage.put_raw(keys::PARAMS, "{not json").await;

        let params = store.load(keys::PARAMS, InferenceParams::default()).await;
        assert_eq!(params, InferenceParams::default());
    }

    #[tokio::test]
    async fn test_wrong_shape_returns_default() {
        let (store, storage) = mock_store();
        storage.put_raw(keys::CUSTOM_MODELS, r#"{"url":"x"}"#).await;

        let models: Vec<Model> = store.load(keys::CUSTOM_MODELS, Vec::new()).await;
        assert!(models.is_empty());
    }

    #[tokio::test]
    async fn test_load_error_returns_default() {
        let (store, storage) = mock_store();
        store.save(keys::WELCOME, &true).await.unwrap();
        storage.set_load_error("disk unplugged".to_string()).await;

        assert!(!store.load(keys::WELCOME, false).await);
        // Error is consumed, next load sees the value
        assert!(store.load(keys::WELCOME, false).await);
    }

    #[tokio::test]
    async fn test_save_error_surfaces() {
        let (store, storage) = mock_store();
        storage.set_save_error("read-only".to_string()).await;

        let err = store.save(keys::WELCOME, &true).await.unwrap_err();
        assert!(matches!(err, ManagerError::Storage(ref msg) if msg.contains("read-only")));
    }

    #[tokio::test]
    async fn test_filesystem_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path().join("store"));

        let params = InferenceParams {
            n_threads: 4,
            temperature: 0.7,
            ..Default::default()
        };
        store.save(keys::PARAMS, &params).await.unwrap();

        assert!(temp_dir.path().join("store/params.json").exists());
        assert!(!temp_dir.path().join("store/params.tmp").exists());
        assert_eq!(store.load(keys::PARAMS, InferenceParams::default()).await, params);
    }

    #[tokio::test]
    async fn test_filesystem_rejects_path_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(temp_dir.path());

        assert!(storage.save("../escape", "1").await.is_err());
        assert!(storage.save("a/b", "1").await.is_err());
        assert!(storage.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(temp_dir.path().join("never-created"));
        assert!(storage.load(keys::WELCOME).await.unwrap().is_none());
    }
}
