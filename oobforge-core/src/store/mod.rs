//! Durable storage for the credential record.
//!
//! This module provides:
//! - [`CredentialStore`] - Trait for loading and saving one record
//! - [`JsonFileStore`] - Flat JSON file, replaced atomically on every save
//! - [`MemoryStore`] - In-memory implementation for testing
//!
//! The pipeline saves after every completed stage, so a resumed run can tell
//! from the populated fields which stages to skip. There is no locking: one
//! run owns the record, and concurrent runs against the same store must be
//! serialized by the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use oobforge_core::store::{CredentialStore, JsonFileStore};
//! use oobforge_core::CredentialRecord;
//!
//! let store = JsonFileStore::new(JsonFileStore::default_path()?);
//! store.save(&CredentialRecord::new("a@b.com")).await?;
//!
//! let record = store.load().await?.unwrap();
//! assert_eq!(record.email.as_deref(), Some("a@b.com"));
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{CredentialRecord, RecordError};

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading or writing the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored record violates stage ordering.
    #[error("invalid record: {0}")]
    Invalid(#[from] RecordError),

    /// Data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Load/save contract for a single credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored record.
    ///
    /// Returns `Ok(None)` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Replace the stored record.
    async fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Remove the stored record.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        (**self).load().await
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        (**self).save(record).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}
