//! In-memory credential storage.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CredentialStore, StoreError};
use crate::record::CredentialRecord;

/// In-memory credential store for testing and dry runs.
///
/// This store is not persistent; data is lost when the process exits.
/// It counts saves so tests can check that every stage persisted.
pub struct MemoryStore {
    record: RwLock<Option<CredentialRecord>>,
    saves: RwLock<usize>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            record: RwLock::new(None),
            saves: RwLock::new(0),
        }
    }

    /// Create a memory store holding a record.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
            saves: RwLock::new(0),
        }
    }

    /// The current record, without going through the async trait.
    pub fn snapshot(&self) -> Option<CredentialRecord> {
        self.record.read().clone()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("has_record", &self.record.read().is_some())
            .field("saves", &self.save_count())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let record = self.record.read().clone();
        if let Some(record) = &record {
            record.validate()?;
        }
        Ok(record)
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        record.validate()?;
        *self.record.write() = Some(record.clone());
        *self.saves.write() += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.record.write() = None;
        Ok(())
    }
}
