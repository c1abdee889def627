//! The Session Machine: a per-admin finite-state controller sequencing
//! multi-step catalog edits.
//!
//! Drafts accumulate in a per-session value owned exclusively by that
//! session and reach the catalog store only on the terminal Confirm, via a
//! single `mutate` call — a cancelled or expired session never touches the
//! catalog. Wrong-kind input re-prompts without transitioning; `Cancel` is
//! accepted everywhere; a new top-level command cancels the in-flight
//! session instead of merging with it.

mod events;
mod machine;

pub use events::{SessionCommand, SessionEvent, SessionReply};
pub use machine::{AdminId, SessionConfig, SessionMachine, SessionStage};
