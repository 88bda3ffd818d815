//! Persistence collaborators for encrypted credential records.

use crate::credentials::crypto::Envelope;
use crate::db::{DbPool, UserRepo};
use crate::error::AppResult;
use async_trait::async_trait;
use dashmap::DashMap;

/// Key-value persistence for one envelope per principal.
///
/// `put` must replace ciphertext and wrapped key together in one atomic
/// write. Concurrent writes for the same principal resolve last-writer-wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the principal has never completed authorization.
    async fn get(&self, principal_id: &str) -> AppResult<Option<Envelope>>;

    async fn put(&self, principal_id: &str, record: Envelope) -> AppResult<()>;
}

/// SQLite-backed store writing to the `users` table.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, principal_id: &str) -> AppResult<Option<Envelope>> {
        UserRepo::get_credentials(&self.pool, principal_id).await
    }

    async fn put(&self, principal_id: &str, record: Envelope) -> AppResult<()> {
        UserRepo::set_credentials(&self.pool, principal_id, &record).await
    }
}

/// Process-local store, used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, Envelope>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored record, for inspecting what actually reached storage.
    pub fn raw(&self, principal_id: &str) -> Option<Envelope> {
        self.entries.get(principal_id).map(|e| e.value().clone())
    }

    /// Replace a record without going through the cache.
    pub fn overwrite(&self, principal_id: &str, record: Envelope) {
        self.entries.insert(principal_id.to_string(), record);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, principal_id: &str) -> AppResult<Option<Envelope>> {
        Ok(self.raw(principal_id))
    }

    async fn put(&self, principal_id: &str, record: Envelope) -> AppResult<()> {
        self.overwrite(principal_id, record);
        Ok(())
    }
}
