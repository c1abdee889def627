use thiserror::Error;

/// Failure taxonomy shared across the catalog subsystems.
///
/// The session machine maps these onto safe state transitions: transport
/// failures keep the draft for retry, validation failures discard it.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A candidate document broke a structural invariant.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The candidate document serialized above the hard size ceiling.
    /// The mutation was rejected and the slot left untouched.
    #[error("document size {size} exceeds ceiling {ceiling}")]
    CapacityExceeded { size: usize, ceiling: usize },

    /// Slot retries exhausted, either on transport failures or on
    /// repeated write conflicts.
    #[error("remote slot unavailable: {0}")]
    RemoteUnavailable(String),

    /// Slot content exists but cannot be reconciled by this build.
    #[error("stored catalog is corrupt: {0}")]
    StoreCorrupt(String),

    /// The uploaded archive could not be opened or enumerated at all.
    #[error("archive unreadable: {0}")]
    MalformedArchive(String),

    /// A single blob operation failed after its own retries.
    #[error("blob transport error: {0}")]
    Transport(String),
}
