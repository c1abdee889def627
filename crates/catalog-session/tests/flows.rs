//! End-to-end session flows against in-memory transports.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use catalog_core::{MediaKind, SlotError, SlotSnapshot, SlotTransport};
use catalog_ingest::{IngestConfig, Ingestor, MemoryBlobGateway};
use catalog_session::{
    SessionCommand, SessionConfig, SessionEvent, SessionMachine, SessionReply, SessionStage,
};
use catalog_store::{CatalogStore, MemorySlot, StoreConfig};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const ALICE: i64 = 1;
const BOB: i64 = 2;

struct Fixture {
    machine: SessionMachine,
    store: Arc<CatalogStore>,
}

async fn fixture() -> Fixture {
    fixture_with(SessionConfig::default(), StoreConfig::default()).await
}

async fn fixture_with(session_config: SessionConfig, store_config: StoreConfig) -> Fixture {
    let slot = Arc::new(MemorySlot::new());
    let store = Arc::new(CatalogStore::new(slot, store_config));
    store.load().await.unwrap();

    let gateway = Arc::new(MemoryBlobGateway::new());
    let ingestor = Arc::new(Ingestor::new(
        gateway.clone(),
        IngestConfig {
            retry_delay: Duration::from_millis(1),
            ..IngestConfig::default()
        },
    ));
    let machine = SessionMachine::new(store.clone(), ingestor, gateway, session_config);
    Fixture { machine, store }
}

/// Slot that can be flipped into a failing mode at the transport level.
struct FlakySlot {
    inner: MemorySlot,
    down: AtomicBool,
}

impl FlakySlot {
    fn new() -> Self {
        Self {
            inner: MemorySlot::new(),
            down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SlotTransport for FlakySlot {
    async fn get(&self) -> Result<Option<SlotSnapshot>, SlotError> {
        self.inner.get().await
    }

    async fn put(&self, content: &str, expected_version: u64) -> Result<u64, SlotError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SlotError::Transport("storage offline".into()));
        }
        self.inner.put(content, expected_version).await
    }
}

fn build_zip(entries: &[(&str, &[u8])]) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

async fn create_comic(fx: &Fixture, admin: i64, title: &str) {
    fx.machine
        .handle(admin, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(admin, SessionEvent::Text(title.into()))
        .await;
    fx.machine
        .handle(admin, SessionEvent::Text("a description".into()))
        .await;
    fx.machine.handle(admin, SessionEvent::Skip).await;
    let reply = fx.machine.handle(admin, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)), "{reply:?}");
}

#[tokio::test]
async fn add_comic_flow_commits_once_on_confirm() {
    let fx = fixture().await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("One Piece".into()))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("pirates".into()))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Image(Bytes::from_static(b"cover")))
        .await;

    // Nothing is persisted until the terminal confirm.
    assert!(fx.store.snapshot().comics.is_empty());

    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)));

    let doc = fx.store.snapshot();
    let comic = doc.comic("one-piece").unwrap();
    assert_eq!(comic.title, "One Piece");
    assert!(comic.cover.is_some());
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);
}

#[tokio::test]
async fn wrong_kind_input_reprompts_without_state_loss() {
    let fx = fixture().await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::AwaitTitle);

    // An image where text is expected: re-prompt, same state.
    let reply = fx.machine
        .handle(ALICE, SessionEvent::Image(Bytes::from_static(b"x")))
        .await;
    assert!(matches!(reply, SessionReply::Reprompt(_)));
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::AwaitTitle);

    // The session still works afterwards.
    fx.machine
        .handle(ALICE, SessionEvent::Text("Still Alive".into()))
        .await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::AwaitDescription);
}

#[tokio::test]
async fn cancel_discards_the_draft_from_any_state() {
    let fx = fixture().await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("Never Committed".into()))
        .await;
    let reply = fx.machine.handle(ALICE, SessionEvent::Cancel).await;
    assert_eq!(reply, SessionReply::Cancelled);
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);
    assert!(fx.store.snapshot().comics.is_empty());
}

#[tokio::test]
async fn new_command_cancels_the_in_flight_session() {
    let fx = fixture().await;
    create_comic(&fx, ALICE, "Target").await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("Abandoned".into()))
        .await;

    // A new top-level command replaces the session instead of merging.
    fx.machine
        .handle(
            ALICE,
            SessionEvent::Command(SessionCommand::EditTitle {
                comic_id: "target".into(),
            }),
        )
        .await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::AwaitEditTitle);

    fx.machine
        .handle(ALICE, SessionEvent::Text("Renamed".into()))
        .await;
    fx.machine.handle(ALICE, SessionEvent::Confirm).await;

    let doc = fx.store.snapshot();
    assert_eq!(doc.comic("target").unwrap().title, "Renamed");
    assert!(doc.comics.iter().all(|c| c.title != "Abandoned"));
}

#[tokio::test]
async fn sessions_of_two_admins_are_isolated() {
    let fx = fixture().await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(BOB, SessionEvent::Command(SessionCommand::AddComic))
        .await;

    fx.machine
        .handle(ALICE, SessionEvent::Text("Alice's Comic".into()))
        .await;
    fx.machine
        .handle(BOB, SessionEvent::Text("Bob's Comic".into()))
        .await;

    // Alice cancelling does not disturb Bob.
    fx.machine.handle(ALICE, SessionEvent::Cancel).await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);
    assert_eq!(fx.machine.stage_of(BOB), SessionStage::AwaitDescription);

    fx.machine
        .handle(BOB, SessionEvent::Text("desc".into()))
        .await;
    fx.machine.handle(BOB, SessionEvent::Skip).await;
    let reply = fx.machine.handle(BOB, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)));

    let doc = fx.store.snapshot();
    assert_eq!(doc.comics.len(), 1);
    assert_eq!(doc.comics[0].title, "Bob's Comic");
}

#[tokio::test]
async fn manual_chapter_flow_assigns_contiguous_sequence() {
    let fx = fixture().await;
    create_comic(&fx, ALICE, "Target").await;

    fx.machine
        .handle(
            ALICE,
            SessionEvent::Command(SessionCommand::AddChapter {
                comic_id: "target".into(),
            }),
        )
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("2.5".into()))
        .await;
    for page in [&b"p1"[..], b"p2", b"p3"] {
        fx.machine
            .handle(ALICE, SessionEvent::Image(Bytes::copy_from_slice(page)))
            .await;
    }
    fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)), "{reply:?}");

    let doc = fx.store.snapshot();
    let chapter = doc.comic("target").unwrap().chapter(2.5).unwrap();
    assert_eq!(chapter.pages.len(), 3);
    let seqs: Vec<u32> = chapter.pages.iter().map(|p| p.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert!(chapter
        .pages
        .iter()
        .all(|p| p.kind == MediaKind::Original));
    doc.validate().unwrap();
}

#[tokio::test]
async fn archive_flow_merges_chapters_in_order() {
    let fx = fixture().await;
    create_comic(&fx, ALICE, "Target").await;

    let archive = build_zip(&[
        ("Chapter 1/page1.jpg", b"a"),
        ("Chapter 1/page2.jpg", b"b"),
        ("Chapter 2.5/page1.jpg", b"c"),
    ]);

    fx.machine
        .handle(
            ALICE,
            SessionEvent::Command(SessionCommand::AddChapter {
                comic_id: "target".into(),
            }),
        )
        .await;
    let reply = fx.machine.handle(ALICE, SessionEvent::Archive(archive)).await;
    assert!(matches!(reply, SessionReply::Prompt(_)), "{reply:?}");
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Confirm);

    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)), "{reply:?}");

    let doc = fx.store.snapshot();
    let comic = doc.comic("target").unwrap();
    let numbers: Vec<f64> = comic.chapters.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1.0, 2.5]);
    assert_eq!(comic.chapters[0].pages.len(), 2);
    assert_eq!(comic.chapters[1].pages.len(), 1);
}

#[tokio::test]
async fn duplicate_comic_is_rejected_and_draft_discarded() {
    let fx = fixture().await;
    create_comic(&fx, ALICE, "Same Title").await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("Same Title".into()))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("other desc".into()))
        .await;
    fx.machine.handle(ALICE, SessionEvent::Skip).await;

    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Rejected(_)), "{reply:?}");
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);
    assert_eq!(fx.store.snapshot().comics.len(), 1);
}

#[tokio::test]
async fn oversized_commit_is_rejected_without_persisting() {
    let fx = fixture_with(
        SessionConfig::default(),
        StoreConfig {
            size_ceiling: 200,
            ..StoreConfig::default()
        },
    )
    .await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("Big".into()))
        .await;
    fx.machine
        .handle(ALICE, SessionEvent::Text("x".repeat(400)))
        .await;
    fx.machine.handle(ALICE, SessionEvent::Skip).await;

    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Rejected(_)), "{reply:?}");
    assert!(fx.store.snapshot().comics.is_empty());
}

#[tokio::test]
async fn delete_comic_flow() {
    let fx = fixture().await;
    create_comic(&fx, ALICE, "Doomed").await;

    fx.machine
        .handle(
            ALICE,
            SessionEvent::Command(SessionCommand::DeleteComic {
                comic_id: "doomed".into(),
            }),
        )
        .await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Confirm);

    let reply = fx.machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)));
    assert!(fx.store.snapshot().comics.is_empty());
}

#[tokio::test]
async fn unknown_comic_command_is_rejected_up_front() {
    let fx = fixture().await;
    let reply = fx.machine
        .handle(
            ALICE,
            SessionEvent::Command(SessionCommand::AddChapter {
                comic_id: "nope".into(),
            }),
        )
        .await;
    assert!(matches!(reply, SessionReply::Rejected(_)));
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);
}

#[tokio::test]
async fn transient_commit_failure_keeps_the_draft_for_retry() {
    let slot = Arc::new(FlakySlot::new());
    let store = Arc::new(CatalogStore::new(
        slot.clone(),
        StoreConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            ..StoreConfig::default()
        },
    ));
    store.load().await.unwrap();
    let gateway = Arc::new(MemoryBlobGateway::new());
    let ingestor = Arc::new(Ingestor::new(gateway.clone(), IngestConfig::default()));
    let machine = SessionMachine::new(store.clone(), ingestor, gateway, SessionConfig::default());

    machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    machine
        .handle(ALICE, SessionEvent::Text("Resilient".into()))
        .await;
    machine
        .handle(ALICE, SessionEvent::Text("desc".into()))
        .await;
    machine.handle(ALICE, SessionEvent::Skip).await;

    // Storage goes away exactly at commit time.
    slot.down.store(true, Ordering::SeqCst);
    let reply = machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::TryAgain(_)), "{reply:?}");
    // The draft survives: the session still sits at the confirm step and
    // nothing was persisted.
    assert_eq!(machine.stage_of(ALICE), SessionStage::Confirm);
    assert!(store.snapshot().comics.is_empty());

    // Confirming again after storage recovers commits the kept draft.
    slot.down.store(false, Ordering::SeqCst);
    let reply = machine.handle(ALICE, SessionEvent::Confirm).await;
    assert!(matches!(reply, SessionReply::Committed(_)), "{reply:?}");
    assert!(store.snapshot().comic("resilient").is_some());
    assert_eq!(machine.stage_of(ALICE), SessionStage::Idle);
}

#[tokio::test]
async fn idle_sessions_are_evicted_after_the_window() {
    let fx = fixture_with(
        SessionConfig {
            idle_timeout: Duration::from_millis(5),
        },
        StoreConfig::default(),
    )
    .await;

    fx.machine
        .handle(ALICE, SessionEvent::Command(SessionCommand::AddComic))
        .await;
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::AwaitTitle);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fx.machine.evict_idle(), 1);
    assert_eq!(fx.machine.stage_of(ALICE), SessionStage::Idle);

    // Text after eviction finds no session and asks for a command.
    let reply = fx.machine
        .handle(ALICE, SessionEvent::Text("too late".into()))
        .await;
    assert!(matches!(reply, SessionReply::Reprompt(_)));
    assert!(fx.store.snapshot().comics.is_empty());
}
