use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted per-user document, keyed by the externally supplied user hash.
/// Created lazily on the first evaluation request for an unseen hash; never
/// deleted by this engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
}

impl UserRecord {
    pub fn apply(&mut self, fields: RecordFields) {
        if let Some(email) = fields.email {
            self.email = Some(email);
        }
        if let Some(version) = fields.key_version {
            self.key_version = Some(version);
        }
        if let Some(locations) = fields.locations {
            self.locations = locations;
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordFields {
    pub email: Option<String>,
    pub key_version: Option<u64>,
    pub locations: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store encoding failed: {0}")]
    Encoding(String),
}

/// Narrow interface to the persisted user-record store. Backends are
/// external collaborators (a document database in production); the engine
/// only depends on these three operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, user_hash: &str) -> Result<UserRecord, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the hash already exists.
    async fn create(&self, record: UserRecord) -> Result<(), StoreError>;

    async fn update(&self, user_hash: &str, fields: RecordFields) -> Result<(), StoreError>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, user_hash: &str) -> Result<UserRecord, StoreError> {
        self.records
            .lock()
            .get(user_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.user_hash) {
            return Err(StoreError::Conflict);
        }
        records.insert(record.user_hash.clone(), record);
        Ok(())
    }

    async fn update(&self, user_hash: &str, fields: RecordFields) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(user_hash).ok_or(StoreError::NotFound)?;
        record.apply(fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryRecordStore, RecordFields, RecordStore, StoreError, UserRecord};

    fn record(user_hash: &str) -> UserRecord {
        UserRecord {
            user_hash: user_hash.to_string(),
            ..UserRecord::default()
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryRecordStore::new();
        store.create(record("u1")).await.unwrap();
        let fetched = store.get("u1").await.unwrap();
        assert_eq!(fetched.user_hash, "u1");
        assert!(fetched.email.is_none());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = MemoryRecordStore::new();
        assert!(matches!(store.get("nope").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = MemoryRecordStore::new();
        store.create(record("u1")).await.unwrap();
        assert!(matches!(
            store.create(record("u1")).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn update_is_partial() {
        let store = MemoryRecordStore::new();
        store.create(record("u1")).await.unwrap();
        store
            .update(
                "u1",
                RecordFields {
                    email: Some("alice@example.com".to_string()),
                    ..RecordFields::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                "u1",
                RecordFields {
                    key_version: Some(3),
                    ..RecordFields::default()
                },
            )
            .await
            .unwrap();

        let fetched = store.get("u1").await.unwrap();
        assert_eq!(fetched.email.as_deref(), Some("alice@example.com"));
        assert_eq!(fetched.key_version, Some(3));
    }
}
