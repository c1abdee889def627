use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CatalogError;
use crate::model::{BlobRef, MediaKind};

/// External service storing page image bytes behind opaque references.
///
/// References are meaningless to the catalog itself; only the gateway can
/// resolve them back to bytes.
#[async_trait]
pub trait BlobGateway: Send + Sync {
    /// Store `bytes` and return an opaque reference to them.
    async fn upload(&self, bytes: Bytes, kind: MediaKind) -> Result<BlobRef, CatalogError>;

    /// Resolve a reference back to the stored bytes.
    async fn fetch(&self, blob: &BlobRef) -> Result<Bytes, CatalogError>;
}
