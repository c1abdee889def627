use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_core::{BlobGateway, BlobRef, CatalogError, Chapter, Comic, MediaKind, Page};
use catalog_ingest::{merge_into_comic, ImportResult, Ingestor};
use catalog_store::CatalogStore;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::events::{SessionCommand, SessionEvent, SessionReply};

/// Admin identity; sessions are keyed by it and never contend across keys.
pub type AdminId = i64;

/// Session-level tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity window after which a session is evicted to `Idle`.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(900),
        }
    }
}

/// Where a session currently sits. Every flow funnels into `Confirm`, and
/// the terminal confirm is the only transition that writes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Idle,
    AwaitTitle,
    AwaitDescription,
    AwaitCover,
    AwaitChapterNumber,
    AwaitChapterPages,
    AwaitEditTitle,
    AwaitEditDescription,
    AwaitEditCover,
    Confirm,
}

/// Accumulated, uncommitted edit state. Exclusively owned by one session.
#[derive(Debug, Default)]
enum Draft {
    #[default]
    None,
    NewComic {
        title: Option<String>,
        description: Option<String>,
        cover: Option<BlobRef>,
    },
    NewChapter {
        comic_id: String,
        number: Option<f64>,
        pages: Vec<BlobRef>,
    },
    Import {
        comic_id: String,
        result: ImportResult,
    },
    EditTitle {
        comic_id: String,
        value: Option<String>,
    },
    EditDescription {
        comic_id: String,
        value: Option<String>,
    },
    EditCover {
        comic_id: String,
        value: Option<BlobRef>,
    },
    DeleteComic {
        comic_id: String,
    },
    DeleteChapter {
        comic_id: String,
        number: f64,
    },
}

struct Session {
    stage: SessionStage,
    draft: Draft,
    last_activity: Instant,
}

impl Session {
    fn idle() -> Self {
        Self {
            stage: SessionStage::Idle,
            draft: Draft::None,
            last_activity: Instant::now(),
        }
    }

    fn reset(&mut self) {
        self.stage = SessionStage::Idle;
        self.draft = Draft::None;
    }
}

/// Per-admin finite-state controller. Consumes ingestor output and issues
/// catalog store mutations; everything else is draft bookkeeping.
pub struct SessionMachine {
    store: Arc<CatalogStore>,
    ingestor: Arc<Ingestor>,
    gateway: Arc<dyn BlobGateway>,
    sessions: DashMap<AdminId, Session>,
    config: SessionConfig,
}

impl SessionMachine {
    pub fn new(
        store: Arc<CatalogStore>,
        ingestor: Arc<Ingestor>,
        gateway: Arc<dyn BlobGateway>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            ingestor,
            gateway,
            sessions: DashMap::new(),
            config,
        }
    }

    /// Feed one admin event through the machine.
    ///
    /// The session is taken out of the table for the duration of the call,
    /// so a slow commit never holds a map lock; a second event for the same
    /// admin racing this one simply starts from `Idle`.
    pub async fn handle(&self, admin: AdminId, event: SessionEvent) -> SessionReply {
        let mut session = self.take(admin);
        let reply = self.step(admin, &mut session, event).await;
        session.last_activity = Instant::now();
        if session.stage != SessionStage::Idle {
            self.sessions.insert(admin, session);
        }
        reply
    }

    /// Stage the admin's session currently sits in. `Idle` when absent.
    pub fn stage_of(&self, admin: AdminId) -> SessionStage {
        self.sessions
            .get(&admin)
            .map(|s| s.stage)
            .unwrap_or(SessionStage::Idle)
    }

    /// Evict sessions idle beyond the configured window. Returns how many
    /// were discarded. The eviction is informational, never an error.
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|admin, session| {
            let keep = session.last_activity.elapsed() <= self.config.idle_timeout;
            if !keep {
                info!(admin = *admin, "session evicted after inactivity, draft discarded");
                evicted += 1;
            }
            keep
        });
        evicted
    }

    fn take(&self, admin: AdminId) -> Session {
        match self.sessions.remove(&admin) {
            Some((_, session))
                if session.last_activity.elapsed() <= self.config.idle_timeout =>
            {
                session
            }
            Some(_) => {
                info!(admin, "expired session discarded on next event");
                Session::idle()
            }
            None => Session::idle(),
        }
    }

    async fn step(
        &self,
        admin: AdminId,
        session: &mut Session,
        event: SessionEvent,
    ) -> SessionReply {
        use SessionReply::*;
        use SessionStage::*;

        let event = match event {
            // Cancel is accepted from every state.
            SessionEvent::Cancel => {
                if session.stage != Idle {
                    debug!(admin, stage = ?session.stage, "session cancelled");
                }
                session.reset();
                return Cancelled;
            }
            // A new top-level command cancels whatever was in flight.
            SessionEvent::Command(cmd) => {
                if session.stage != Idle {
                    warn!(admin, stage = ?session.stage, "new command cancels in-flight session");
                    session.reset();
                }
                return self.start(session, cmd);
            }
            other => other,
        };

        match (session.stage, event) {
            (Idle, _) => Reprompt("No session in progress. Start with a command.".into()),

            (AwaitTitle, SessionEvent::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Reprompt("The title cannot be empty. Send the comic title.".into());
                }
                if let Draft::NewComic { title, .. } = &mut session.draft {
                    *title = Some(text.to_string());
                }
                session.stage = AwaitDescription;
                Prompt("Send the comic description.".into())
            }

            (AwaitDescription, SessionEvent::Text(text)) => {
                if let Draft::NewComic { description, .. } = &mut session.draft {
                    *description = Some(text.trim().to_string());
                }
                session.stage = AwaitCover;
                Prompt("Send a cover image, or skip.".into())
            }

            (AwaitCover, SessionEvent::Image(bytes)) => {
                match self.gateway.upload(bytes, MediaKind::Compressed).await {
                    Ok(blob) => {
                        if let Draft::NewComic { cover, .. } = &mut session.draft {
                            *cover = Some(blob);
                        }
                        session.stage = Confirm;
                        Prompt("Cover stored. Confirm to create the comic.".into())
                    }
                    Err(e) => TryAgain(format!("Cover upload failed: {e}. Send it again.")),
                }
            }
            (AwaitCover, SessionEvent::Skip) => {
                session.stage = Confirm;
                Prompt("No cover. Confirm to create the comic.".into())
            }

            (AwaitChapterNumber, SessionEvent::Text(text)) => {
                match text.trim().parse::<f64>() {
                    Ok(number) if number.is_finite() && number >= 0.0 => {
                        if let Draft::NewChapter {
                            number: draft_number,
                            ..
                        } = &mut session.draft
                        {
                            *draft_number = Some(number);
                        }
                        session.stage = AwaitChapterPages;
                        Prompt(format!(
                            "Chapter {number}. Send page images in order, then confirm."
                        ))
                    }
                    _ => Reprompt(
                        "Send a chapter number like 12 or 2.5, or an archive of chapters.".into(),
                    ),
                }
            }
            (AwaitChapterNumber, SessionEvent::Archive(bytes)) => {
                let comic_id = match &session.draft {
                    Draft::NewChapter { comic_id, .. } => comic_id.clone(),
                    _ => return Reprompt("No target comic for this archive.".into()),
                };
                match self.ingestor.ingest(bytes.to_vec()).await {
                    Ok(result) => {
                        let summary = format!(
                            "Archive read: {} chapters, {} pages, {} warnings. Confirm to merge.",
                            result.chapters.len(),
                            result.total_pages(),
                            result.all_warnings().len()
                        );
                        session.draft = Draft::Import { comic_id, result };
                        session.stage = Confirm;
                        Prompt(summary)
                    }
                    Err(e) => Reprompt(format!("Archive unreadable: {e}. Send another one.")),
                }
            }

            (AwaitChapterPages, SessionEvent::Image(bytes)) => {
                match self.gateway.upload(bytes, MediaKind::Original).await {
                    Ok(blob) => {
                        let count = match &mut session.draft {
                            Draft::NewChapter { pages, .. } => {
                                pages.push(blob);
                                pages.len()
                            }
                            _ => 0,
                        };
                        Prompt(format!("Page {count} added. Send more or confirm."))
                    }
                    Err(e) => TryAgain(format!("Page upload failed: {e}. Send it again.")),
                }
            }
            (AwaitChapterPages, SessionEvent::Confirm) => match &session.draft {
                Draft::NewChapter { pages, .. } if !pages.is_empty() => {
                    session.stage = Confirm;
                    Prompt(format!(
                        "{} pages staged. Confirm to commit the chapter.",
                        pages.len()
                    ))
                }
                _ => Reprompt("No pages yet. Send at least one page image.".into()),
            },

            (AwaitEditTitle, SessionEvent::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Reprompt("The title cannot be empty.".into());
                }
                if let Draft::EditTitle { value, .. } = &mut session.draft {
                    *value = Some(text.to_string());
                }
                session.stage = Confirm;
                Prompt("Confirm to apply the new title.".into())
            }

            (AwaitEditDescription, SessionEvent::Text(text)) => {
                if let Draft::EditDescription { value, .. } = &mut session.draft {
                    *value = Some(text.trim().to_string());
                }
                session.stage = Confirm;
                Prompt("Confirm to apply the new description.".into())
            }

            (AwaitEditCover, SessionEvent::Image(bytes)) => {
                match self.gateway.upload(bytes, MediaKind::Compressed).await {
                    Ok(blob) => {
                        if let Draft::EditCover { value, .. } = &mut session.draft {
                            *value = Some(blob);
                        }
                        session.stage = Confirm;
                        Prompt("Confirm to apply the new cover.".into())
                    }
                    Err(e) => TryAgain(format!("Cover upload failed: {e}. Send it again.")),
                }
            }

            (Confirm, SessionEvent::Confirm) => match self.commit(&session.draft).await {
                Ok(summary) => {
                    info!(admin, "session committed: {summary}");
                    session.reset();
                    Committed(summary)
                }
                Err(e @ (CatalogError::RemoteUnavailable(_) | CatalogError::Transport(_))) => {
                    warn!(admin, "commit hit a transient failure, draft kept: {e}");
                    TryAgain(format!("Could not reach storage: {e}. Confirm to retry."))
                }
                Err(e) => {
                    warn!(admin, "commit rejected, draft discarded: {e}");
                    session.reset();
                    Rejected(e.to_string())
                }
            },

            // Anything else is input of the wrong kind for the state.
            (stage, _) => Reprompt(expectation(stage).to_string()),
        }
    }

    /// Begin a fresh session for a top-level command. Target comics are
    /// checked against the current snapshot up front.
    fn start(&self, session: &mut Session, cmd: SessionCommand) -> SessionReply {
        use SessionReply::*;

        let snapshot = self.store.snapshot();
        let check_comic = |comic_id: &str| -> Option<SessionReply> {
            if snapshot.comic(comic_id).is_none() {
                Some(Rejected(format!("No comic with id {comic_id:?}.")))
            } else {
                None
            }
        };

        match cmd {
            SessionCommand::AddComic => {
                session.stage = SessionStage::AwaitTitle;
                session.draft = Draft::NewComic {
                    title: None,
                    description: None,
                    cover: None,
                };
                Prompt("Send the comic title.".into())
            }
            SessionCommand::AddChapter { comic_id } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::AwaitChapterNumber;
                session.draft = Draft::NewChapter {
                    comic_id,
                    number: None,
                    pages: Vec::new(),
                };
                Prompt("Send a chapter number, or an archive of chapter folders.".into())
            }
            SessionCommand::EditTitle { comic_id } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::AwaitEditTitle;
                session.draft = Draft::EditTitle {
                    comic_id,
                    value: None,
                };
                Prompt("Send the new title.".into())
            }
            SessionCommand::EditDescription { comic_id } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::AwaitEditDescription;
                session.draft = Draft::EditDescription {
                    comic_id,
                    value: None,
                };
                Prompt("Send the new description.".into())
            }
            SessionCommand::EditCover { comic_id } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::AwaitEditCover;
                session.draft = Draft::EditCover {
                    comic_id,
                    value: None,
                };
                Prompt("Send the new cover image.".into())
            }
            SessionCommand::DeleteComic { comic_id } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::Confirm;
                let prompt = format!("Confirm to delete comic {comic_id:?} and all its chapters.");
                session.draft = Draft::DeleteComic { comic_id };
                Prompt(prompt)
            }
            SessionCommand::DeleteChapter { comic_id, number } => {
                if let Some(reply) = check_comic(&comic_id) {
                    return reply;
                }
                session.stage = SessionStage::Confirm;
                let prompt = format!("Confirm to delete chapter {number} of {comic_id:?}.");
                session.draft = Draft::DeleteChapter { comic_id, number };
                Prompt(prompt)
            }
        }
    }

    /// Realize a draft as one atomic `mutate` call. The transforms are pure
    /// functions of the snapshot they receive, so the store may re-apply
    /// them on conflict.
    async fn commit(&self, draft: &Draft) -> Result<String, CatalogError> {
        match draft {
            Draft::None => Err(CatalogError::Validation("nothing to commit".into())),

            Draft::NewComic {
                title,
                description,
                cover,
            } => {
                let title = title.clone().ok_or_else(|| {
                    CatalogError::Validation("draft is missing a title".into())
                })?;
                let description = description.clone().unwrap_or_default();
                let cover = cover.clone();
                let doc = self
                    .store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let mut comic = Comic::new(title.clone(), description.clone());
                        comic.cover = cover.clone();
                        next.comics.push(comic);
                        Ok(next)
                    })
                    .await?;
                Ok(format!("Comic created ({} comics total).", doc.comics.len()))
            }

            Draft::NewChapter {
                comic_id,
                number,
                pages,
            } => {
                let number = number.ok_or_else(|| {
                    CatalogError::Validation("draft is missing a chapter number".into())
                })?;
                let comic_id = comic_id.clone();
                let page_count = pages.len();
                let pages = pages.clone();
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id).ok_or_else(|| {
                            CatalogError::Validation(format!("unknown comic {comic_id:?}"))
                        })?;
                        let pages = pages
                            .iter()
                            .enumerate()
                            .map(|(seq, blob)| {
                                Page::new(seq as u32, blob.clone(), MediaKind::Original)
                            })
                            .collect();
                        comic.upsert_chapter(Chapter::new(number, pages));
                        Ok(next)
                    })
                    .await?;
                Ok(format!("Chapter {number} committed with {page_count} pages."))
            }

            Draft::Import { comic_id, result } => {
                let comic_id_for_transform = comic_id.clone();
                let result_ref = result;
                let doc = self
                    .store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id_for_transform).ok_or_else(|| {
                            CatalogError::Validation(format!(
                                "unknown comic {comic_id_for_transform:?}"
                            ))
                        })?;
                        merge_into_comic(comic, result_ref);
                        Ok(next)
                    })
                    .await?;
                let chapter_total = doc
                    .comic(comic_id)
                    .map(|c| c.chapters.len())
                    .unwrap_or_default();
                Ok(format!(
                    "Merged {} chapters ({} pages, {} warnings); comic now has {chapter_total} chapters.",
                    result.chapters.iter().filter(|c| !c.pages.is_empty()).count(),
                    result.total_pages(),
                    result.all_warnings().len()
                ))
            }

            Draft::EditTitle { comic_id, value } => {
                let value = value.clone().ok_or_else(|| {
                    CatalogError::Validation("draft is missing the new title".into())
                })?;
                let comic_id = comic_id.clone();
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id).ok_or_else(|| {
                            CatalogError::Validation(format!("unknown comic {comic_id:?}"))
                        })?;
                        comic.title = value.clone();
                        Ok(next)
                    })
                    .await?;
                Ok("Title updated.".into())
            }

            Draft::EditDescription { comic_id, value } => {
                let value = value.clone().unwrap_or_default();
                let comic_id = comic_id.clone();
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id).ok_or_else(|| {
                            CatalogError::Validation(format!("unknown comic {comic_id:?}"))
                        })?;
                        comic.description = value.clone();
                        Ok(next)
                    })
                    .await?;
                Ok("Description updated.".into())
            }

            Draft::EditCover { comic_id, value } => {
                let value = value.clone().ok_or_else(|| {
                    CatalogError::Validation("draft is missing the new cover".into())
                })?;
                let comic_id = comic_id.clone();
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id).ok_or_else(|| {
                            CatalogError::Validation(format!("unknown comic {comic_id:?}"))
                        })?;
                        comic.cover = Some(value.clone());
                        Ok(next)
                    })
                    .await?;
                Ok("Cover updated.".into())
            }

            Draft::DeleteComic { comic_id } => {
                let comic_id = comic_id.clone();
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let before = next.comics.len();
                        next.comics.retain(|c| c.id != comic_id);
                        if next.comics.len() == before {
                            return Err(CatalogError::Validation(format!(
                                "unknown comic {comic_id:?}"
                            )));
                        }
                        Ok(next)
                    })
                    .await?;
                Ok("Comic deleted.".into())
            }

            Draft::DeleteChapter { comic_id, number } => {
                let comic_id = comic_id.clone();
                let number = *number;
                self.store
                    .mutate(move |doc| {
                        let mut next = doc.clone();
                        let comic = next.comic_mut(&comic_id).ok_or_else(|| {
                            CatalogError::Validation(format!("unknown comic {comic_id:?}"))
                        })?;
                        if !comic.remove_chapter(number) {
                            return Err(CatalogError::Validation(format!(
                                "comic {comic_id:?} has no chapter {number}"
                            )));
                        }
                        Ok(next)
                    })
                    .await?;
                Ok(format!("Chapter {number} deleted."))
            }
        }
    }
}

/// What kind of input a state expects; used for wrong-kind re-prompts.
fn expectation(stage: SessionStage) -> &'static str {
    match stage {
        SessionStage::Idle => "Start with a command.",
        SessionStage::AwaitTitle => "Expecting the comic title as text.",
        SessionStage::AwaitDescription => "Expecting the description as text.",
        SessionStage::AwaitCover => "Expecting a cover image, or skip.",
        SessionStage::AwaitChapterNumber => "Expecting a chapter number or an archive.",
        SessionStage::AwaitChapterPages => "Expecting page images, or confirm when done.",
        SessionStage::AwaitEditTitle => "Expecting the new title as text.",
        SessionStage::AwaitEditDescription => "Expecting the new description as text.",
        SessionStage::AwaitEditCover => "Expecting the new cover image.",
        SessionStage::Confirm => "Confirm to commit, or cancel.",
    }
}
