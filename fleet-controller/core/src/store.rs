use crate::{PairingKey, PairingStatus};

/// A pairing status together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored {
    pub status: PairingStatus,
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record changed since it was read.
    #[error("pairing was modified concurrently")]
    Conflict,

    #[error("pairing not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Durable storage for pairing statuses with optimistic concurrency.
#[async_trait::async_trait]
pub trait PairingStore: Send + Sync {
    async fn get(&self, key: &PairingKey) -> Result<Option<Stored>, StoreError>;

    /// Creates the record, returning its version.
    async fn create(&self, key: &PairingKey, status: &PairingStatus) -> Result<String, StoreError>;

    /// Replaces the record if it is still at `version`, returning the new
    /// version. Fails with [`StoreError::Conflict`] otherwise.
    async fn update(
        &self,
        key: &PairingKey,
        status: &PairingStatus,
        version: &str,
    ) -> Result<String, StoreError>;

    /// Deletes the record. Deleting a missing record succeeds.
    async fn delete(&self, key: &PairingKey) -> Result<(), StoreError>;
}
