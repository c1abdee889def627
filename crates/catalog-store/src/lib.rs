//! The Catalog Store: owner of the in-memory canonical document and the
//! only writer of the remote slot.
//!
//! The backing slot offers no transactions, so correctness under concurrent
//! admin actions rests on two layers:
//! - a process-wide single-writer lock serializing all `mutate` calls
//! - optimistic version-checked puts with bounded retry against writes the
//!   process did not observe (e.g. a previous incarnation's in-flight put)
//!
//! Readers never block: `snapshot` hands out `Arc` clones of the latest
//! committed document.

mod http;
mod memory;
mod store;

pub use http::HttpSlot;
pub use memory::MemorySlot;
pub use store::{CatalogStore, StoreConfig};
