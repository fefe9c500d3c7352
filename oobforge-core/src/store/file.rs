//! JSON file credential storage.
//!
//! # Storage Location
//!
//! The record is stored at `~/.local/share/oobforge/credentials.json` on
//! Linux, `~/Library/Application Support/com.raibid-labs.oobforge/` on macOS
//! and `%APPDATA%\raibid-labs\oobforge\data\` on Windows, unless a path is
//! given explicitly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{CredentialStore, StoreError};
use crate::record::CredentialRecord;

/// File name used under the platform data directory.
pub const DEFAULT_FILE_NAME: &str = "credentials.json";

/// Disk-backed credential store.
///
/// Every save writes the whole record to a sibling temporary file and
/// renames it over the target, so a crash mid-write leaves the previous
/// record intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the default storage path for the record.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "oobforge")
            .ok_or(StoreError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join(DEFAULT_FILE_NAME))
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CredentialRecord = serde_json::from_str(&contents)?;
        record.validate()?;
        Ok(Some(record))
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        record.validate()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_vec_pretty(record)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, contents).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = ?self.path, "credential record saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Secret;
    use tempfile::TempDir;

    fn test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("nested").join("credentials.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let (store, _temp) = test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (store, _temp) = test_store();

        let mut record = CredentialRecord::new("a@b.com");
        record
            .mark_signed_in(
                Some("u1".to_string()),
                Secret::new("t1"),
                Secret::new("r1"),
                Some(3600),
            )
            .unwrap();

        store.save(&record).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, record);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (store, _temp) = test_store();

        store.save(&CredentialRecord::new("first@b.com")).await.unwrap();
        store.save(&CredentialRecord::new("second@b.com")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.email.as_deref(), Some("second@b.com"));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let (store, _temp) = test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _temp) = test_store();
        store.save(&CredentialRecord::new("a@b.com")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        // Clearing again is fine.
        store.clear().await.unwrap();
    }
}
