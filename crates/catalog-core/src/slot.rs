use async_trait::async_trait;
use thiserror::Error;

/// Raw slot content together with the version observed at read time.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub content: String,
    pub version: u64,
}

/// Outcome of a failed slot operation.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The slot advanced past the expected version since it was read.
    #[error("slot version conflict")]
    Conflict,

    /// The transport itself failed.
    #[error("slot transport error: {0}")]
    Transport(String),
}

/// The single durable remote object holding the serialized catalog.
///
/// Get plus put-with-expected-version is the whole contract; the mutate
/// loop in `catalog-store` layers optimistic concurrency on top of it.
/// Versions start at 0 (never written) and increase by one per put.
#[async_trait]
pub trait SlotTransport: Send + Sync {
    /// Fetch the current content, or `None` if the slot was never written.
    async fn get(&self) -> Result<Option<SlotSnapshot>, SlotError>;

    /// Write `content` if and only if the slot is still at
    /// `expected_version`. Returns the new version on success.
    async fn put(&self, content: &str, expected_version: u64) -> Result<u64, SlotError>;
}
