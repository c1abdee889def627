//! The Archive Ingestor: turns an uploaded hierarchical archive into an
//! ordered, validated chapter/page structure.
//!
//! Pure transformation over archive bytes plus blob-gateway uploads; it
//! never touches the catalog store. Per-file problems accumulate as
//! warnings inside the `ImportResult` — only a wholly unreadable archive
//! is fatal. The merge policy (`merge_into_comic`) runs inside a store
//! `mutate` transform on the caller's side.

mod archive;
mod gateway;
mod ingest;
mod merge;
mod natural;

pub use archive::{extract_chapter_number, scan, ArchivePlan, PlannedChapter, PlannedPage};
pub use gateway::{HttpBlobGateway, MemoryBlobGateway};
pub use ingest::{ImportResult, ImportedChapter, IngestConfig, Ingestor};
pub use merge::merge_into_comic;
pub use natural::natural_cmp;
