//! Core traits and types shared by the comic catalog subsystems.
//!
//! This crate defines the pieces the store, ingestor, and session machine
//! agree on:
//! - the `CatalogDocument` aggregate and its structural invariants
//! - the forward-compatible JSON wire codec (unknown fields round-trip)
//! - `SlotTransport`: the single versioned remote object acting as storage
//! - `BlobGateway`: opaque-reference storage for page image bytes
//! - the shared error taxonomy

mod blob;
mod error;
mod model;
mod slot;
mod wire;

pub use blob::BlobGateway;
pub use error::CatalogError;
pub use model::{
    slugify, BlobRef, CatalogDocument, CatalogStats, Chapter, Comic, MediaKind, Page,
    SCHEMA_VERSION,
};
pub use slot::{SlotError, SlotSnapshot, SlotTransport};
pub use wire::{decode, encode};
