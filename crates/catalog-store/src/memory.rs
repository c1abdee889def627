use async_trait::async_trait;
use catalog_core::{SlotError, SlotSnapshot, SlotTransport};
use tokio::sync::Mutex;

/// In-process slot, used by tests and single-process local runs.
///
/// Implements the same conditional-put semantics as the remote transport:
/// a put only lands when `expected_version` matches the stored version.
#[derive(Default)]
pub struct MemorySlot {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    content: Option<String>,
    version: u64,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored version (0 = never written). Test helper.
    pub async fn version(&self) -> u64 {
        self.inner.lock().await.version
    }
}

#[async_trait]
impl SlotTransport for MemorySlot {
    async fn get(&self) -> Result<Option<SlotSnapshot>, SlotError> {
        let state = self.inner.lock().await;
        Ok(state.content.as_ref().map(|content| SlotSnapshot {
            content: content.clone(),
            version: state.version,
        }))
    }

    async fn put(&self, content: &str, expected_version: u64) -> Result<u64, SlotError> {
        let mut state = self.inner.lock().await;
        if state.version != expected_version {
            return Err(SlotError::Conflict);
        }
        state.content = Some(content.to_string());
        state.version += 1;
        Ok(state.version)
    }
}
