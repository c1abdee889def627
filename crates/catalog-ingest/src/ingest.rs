use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use catalog_core::{BlobGateway, BlobRef, CatalogError, MediaKind, Page};
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::archive;

/// Upload tuning for the ingestor.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// How many page uploads run at once. Ordering is unaffected: `seq`
    /// comes from the pre-computed natural order, not completion order.
    pub upload_concurrency: usize,
    /// Attempts per page before it is dropped with a warning.
    pub per_page_attempts: u32,
    /// Initial delay between attempts; doubles per attempt.
    pub retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: 4,
            per_page_attempts: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// One ingested chapter: pages uploaded, ordered, and compacted to a
/// contiguous 0-based `seq` run.
#[derive(Debug)]
pub struct ImportedChapter {
    /// `None` means the folder had no numeric token; the merge resolves it
    /// to `max(existing) + 1`.
    pub number: Option<f64>,
    pub folder: String,
    pub pages: Vec<Page>,
    pub warnings: Vec<String>,
}

/// Outcome of ingesting one archive. Warnings never abort the batch.
#[derive(Debug)]
pub struct ImportResult {
    pub chapters: Vec<ImportedChapter>,
    pub warnings: Vec<String>,
}

impl ImportResult {
    pub fn total_pages(&self) -> usize {
        self.chapters.iter().map(|c| c.pages.len()).sum()
    }

    /// Global and per-chapter warnings, flattened for display.
    pub fn all_warnings(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .map(String::as_str)
            .chain(
                self.chapters
                    .iter()
                    .flat_map(|c| c.warnings.iter().map(String::as_str)),
            )
            .collect()
    }
}

/// Turns raw archive bytes into an ordered import result, uploading each
/// page through the blob gateway. Depends on the gateway only — never on
/// the catalog store.
pub struct Ingestor {
    gateway: Arc<dyn BlobGateway>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(gateway: Arc<dyn BlobGateway>, config: IngestConfig) -> Self {
        Self { gateway, config }
    }

    /// Ingest one archive. Fatal only when the archive itself cannot be
    /// enumerated; failed page uploads degrade to warnings.
    #[instrument(skip_all, fields(archive_len = archive_bytes.len()))]
    pub async fn ingest(&self, archive_bytes: Vec<u8>) -> Result<ImportResult, CatalogError> {
        let plan = tokio::task::spawn_blocking(move || archive::scan(archive_bytes))
            .await
            .map_err(|e| CatalogError::MalformedArchive(format!("archive scan failed: {e}")))??;

        let mut chapters = Vec::with_capacity(plan.chapters.len());
        for planned in plan.chapters {
            let mut warnings = planned.warnings;

            // seq is fixed by natural order here, before dispatch; upload
            // concurrency cannot reorder pages.
            let uploads = stream::iter(planned.pages.into_iter().enumerate().map(
                |(order, page)| {
                    let gateway = Arc::clone(&self.gateway);
                    let attempts = self.config.per_page_attempts;
                    let delay = self.config.retry_delay;
                    async move {
                        let result =
                            upload_with_retry(gateway, page.bytes, attempts, delay).await;
                        (order, page.name, result)
                    }
                },
            ))
            .buffer_unordered(self.config.upload_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

            let mut uploads = uploads;
            uploads.sort_by_key(|(order, _, _)| *order);

            let mut pages = Vec::with_capacity(uploads.len());
            for (_, name, result) in uploads {
                match result {
                    Ok(blob) => {
                        pages.push(Page::new(pages.len() as u32, blob, MediaKind::Original))
                    }
                    Err(e) => {
                        warn!(folder = %planned.folder, page = %name, "page dropped: {e}");
                        warnings.push(format!("{}/{name}: upload failed, page dropped: {e}", planned.folder));
                    }
                }
            }

            info!(
                folder = %planned.folder,
                number = ?planned.number,
                pages = pages.len(),
                warnings = warnings.len(),
                "chapter ingested"
            );
            chapters.push(ImportedChapter {
                number: planned.number,
                folder: planned.folder,
                pages,
                warnings,
            });
        }

        Ok(ImportResult {
            chapters,
            warnings: plan.warnings,
        })
    }
}

/// Bounded per-page retry; exhaustion returns the last error message.
async fn upload_with_retry(
    gateway: Arc<dyn BlobGateway>,
    bytes: Bytes,
    attempts: u32,
    mut delay: Duration,
) -> Result<BlobRef, String> {
    let mut last_error = String::new();
    for attempt in 1..=attempts.max(1) {
        match gateway.upload(bytes.clone(), MediaKind::Original).await {
            Ok(blob) => return Ok(blob),
            Err(e) => {
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(last_error)
}
