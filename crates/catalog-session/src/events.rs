use bytes::Bytes;

/// Top-level commands. Arriving mid-session they cancel the in-flight
/// session first; drafts from two commands are never interleaved.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Start the add-comic flow (title, description, cover, confirm).
    AddComic,
    /// Start the add-chapter flow for an existing comic: either a manual
    /// number + pages, or a whole archive.
    AddChapter { comic_id: String },
    EditTitle { comic_id: String },
    EditDescription { comic_id: String },
    EditCover { comic_id: String },
    DeleteComic { comic_id: String },
    DeleteChapter { comic_id: String, number: f64 },
}

/// One admin input. Each state accepts only the kinds it expects.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Command(SessionCommand),
    Text(String),
    Image(Bytes),
    Archive(Bytes),
    /// Skip an optional step (the cover).
    Skip,
    /// Advance past an accumulating step, or finalize from `Confirm`.
    Confirm,
    /// Abort the session from any state, discarding the draft.
    Cancel,
}

/// What the frontend should relay back to the admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    /// Input accepted, session advanced; the message says what comes next.
    Prompt(String),
    /// Input of the wrong kind; state unchanged.
    Reprompt(String),
    /// Draft committed to the catalog.
    Committed(String),
    /// Session cancelled, draft discarded.
    Cancelled,
    /// Commit rejected (validation or capacity); draft discarded.
    Rejected(String),
    /// Transient failure; draft kept, Confirm again to retry.
    TryAgain(String),
}
