//! JSON wire codec for the slot content.
//!
//! The format is forward-compatible: fields this build does not know about
//! are captured into the flattened `extra` maps on every level and written
//! back out unchanged on encode.

use crate::error::CatalogError;
use crate::model::CatalogDocument;

/// Serialize a document to slot content.
pub fn encode(doc: &CatalogDocument) -> Result<String, CatalogError> {
    serde_json::to_string(doc).map_err(|e| CatalogError::StoreCorrupt(format!("encode: {e}")))
}

/// Parse slot content back into a document.
pub fn decode(content: &str) -> Result<CatalogDocument, CatalogError> {
    serde_json::from_str(content).map_err(|e| CatalogError::StoreCorrupt(format!("decode: {e}")))
}
