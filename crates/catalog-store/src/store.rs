use std::sync::{Arc, RwLock};
use std::time::Duration;

use catalog_core::{encode, CatalogDocument, CatalogError, SlotError, SlotTransport, SCHEMA_VERSION};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Size governance and retry tuning for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hard ceiling on serialized document size in bytes. A candidate above
    /// this is rejected with `CapacityExceeded` before touching the slot.
    pub size_ceiling: usize,
    /// Fraction of the ceiling above which successful commits log a warning.
    pub soft_ratio: f64,
    /// How many conflict/transport failures `mutate` absorbs before
    /// surfacing `RemoteUnavailable`.
    pub max_retries: u32,
    /// Initial backoff between retries; doubles per attempt.
    pub base_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // The original deployment pinned the catalog into a single
            // 4096-character message; keep that as the default envelope.
            size_ceiling: 4096,
            soft_ratio: 0.8,
            max_retries: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Owner of the canonical in-memory document and sole writer of the slot.
pub struct CatalogStore {
    slot: Arc<dyn SlotTransport>,
    config: StoreConfig,
    /// Latest committed document. Swapped wholesale under a short lock so
    /// `snapshot` never blocks on writers.
    current: RwLock<Arc<CatalogDocument>>,
    /// Process-wide single-writer lock; held across the whole mutate loop.
    write_lock: tokio::sync::Mutex<()>,
}

impl CatalogStore {
    pub fn new(slot: Arc<dyn SlotTransport>, config: StoreConfig) -> Self {
        Self {
            slot,
            config,
            current: RwLock::new(Arc::new(CatalogDocument::empty())),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Fetch and adopt the slot content.
    ///
    /// Missing or unparsable content falls back to an empty document with a
    /// logged recovery event; the observed slot version is kept so the next
    /// conditional put still detects concurrent writers. Content that parses
    /// but declares a newer schema than this build understands is the one
    /// unrecoverable case.
    pub async fn load(&self) -> Result<Arc<CatalogDocument>, CatalogError> {
        let snapshot = self
            .slot
            .get()
            .await
            .map_err(|e| CatalogError::RemoteUnavailable(e.to_string()))?;

        let doc = match snapshot {
            None => {
                info!("slot is empty, starting with a fresh catalog");
                CatalogDocument::empty()
            }
            Some(slot) => match catalog_core::decode(&slot.content) {
                Ok(mut doc) => {
                    if doc.schema_version > SCHEMA_VERSION {
                        return Err(CatalogError::StoreCorrupt(format!(
                            "slot holds schema {} but this build understands up to {}",
                            doc.schema_version, SCHEMA_VERSION
                        )));
                    }
                    // The slot version is authoritative for conflict checks.
                    doc.version = slot.version;
                    doc
                }
                Err(e) => {
                    warn!(
                        version = slot.version,
                        "slot content unparsable, recovering with an empty catalog: {e}"
                    );
                    CatalogDocument::empty_at(slot.version)
                }
            },
        };

        let doc = Arc::new(doc);
        self.install(Arc::clone(&doc));
        Ok(doc)
    }

    /// Immutable copy of the current in-memory document. Never blocks on
    /// writers beyond the pointer swap.
    pub fn snapshot(&self) -> Arc<CatalogDocument> {
        Arc::clone(&self.current.read().expect("catalog state poisoned"))
    }

    /// The sole write path.
    ///
    /// Applies `transform` to the latest snapshot, validates every
    /// invariant, and writes the candidate tagged with the prior version.
    /// On a version conflict the freshly observed document is adopted and
    /// `transform` is re-applied from scratch, so it must be a pure function
    /// of the snapshot it is given. Bounded retries with exponential backoff
    /// cover both conflicts and transport failures.
    pub async fn mutate<F>(&self, transform: F) -> Result<Arc<CatalogDocument>, CatalogError>
    where
        F: Fn(&CatalogDocument) -> Result<CatalogDocument, CatalogError>,
    {
        let _writer = self.write_lock.lock().await;

        let mut base = self.snapshot();
        let mut delay = self.config.base_delay;

        for attempt in 0..=self.config.max_retries {
            let mut candidate = transform(&base)?;
            candidate.version = base.version + 1;
            candidate.updated_at = Utc::now();
            candidate.validate()?;

            let encoded = encode(&candidate)?;
            if encoded.len() > self.config.size_ceiling {
                return Err(CatalogError::CapacityExceeded {
                    size: encoded.len(),
                    ceiling: self.config.size_ceiling,
                });
            }

            match self.slot.put(&encoded, base.version).await {
                Ok(new_version) => {
                    candidate.version = new_version;
                    let soft = (self.config.size_ceiling as f64 * self.config.soft_ratio) as usize;
                    if encoded.len() > soft {
                        warn!(
                            size = encoded.len(),
                            ceiling = self.config.size_ceiling,
                            "catalog size above soft threshold"
                        );
                    }
                    debug!(version = new_version, size = encoded.len(), "catalog committed");
                    let committed = Arc::new(candidate);
                    self.install(Arc::clone(&committed));
                    return Ok(committed);
                }
                Err(SlotError::Conflict) => {
                    if attempt == self.config.max_retries {
                        break;
                    }
                    warn!(
                        attempt = attempt + 1,
                        expected = base.version,
                        "slot version conflict, re-applying transform against fresh state"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    base = self.refresh().await?;
                }
                Err(SlotError::Transport(e)) => {
                    if attempt == self.config.max_retries {
                        return Err(CatalogError::RemoteUnavailable(e));
                    }
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "slot write failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        Err(CatalogError::RemoteUnavailable(format!(
            "slot conflict persisted after {} retries",
            self.config.max_retries
        )))
    }

    /// Re-read the slot after a conflict and adopt what is actually stored.
    /// Unparsable content recovers exactly as in `load`, so a concurrent
    /// writer storing garbage stays a retryable conflict.
    async fn refresh(&self) -> Result<Arc<CatalogDocument>, CatalogError> {
        let snapshot = self
            .slot
            .get()
            .await
            .map_err(|e| CatalogError::RemoteUnavailable(e.to_string()))?;

        let doc = match snapshot {
            None => CatalogDocument::empty(),
            Some(slot) => match catalog_core::decode(&slot.content) {
                Ok(mut doc) => {
                    if doc.schema_version > SCHEMA_VERSION {
                        return Err(CatalogError::StoreCorrupt(format!(
                            "slot holds schema {} but this build understands up to {}",
                            doc.schema_version, SCHEMA_VERSION
                        )));
                    }
                    doc.version = slot.version;
                    doc
                }
                Err(e) => {
                    warn!(
                        version = slot.version,
                        "slot content unparsable on refresh, recovering with an empty catalog: {e}"
                    );
                    CatalogDocument::empty_at(slot.version)
                }
            },
        };
        let doc = Arc::new(doc);
        self.install(Arc::clone(&doc));
        Ok(doc)
    }

    fn install(&self, doc: Arc<CatalogDocument>) {
        *self.current.write().expect("catalog state poisoned") = doc;
    }
}
