use catalog_core::{Chapter, Comic};
use tracing::debug;

use crate::ingest::ImportResult;

/// Merge an import result into a comic. Intended to run inside a catalog
/// store `mutate` transform.
///
/// Policy: a chapter number matching an existing one replaces that
/// chapter's pages entirely; new numbers are inserted keeping the
/// ascending sort; unnumbered chapters resolve to `max(existing) + 1`,
/// where "existing" includes chapters merged earlier in the same call.
/// Chapters whose every page failed to upload are skipped.
///
/// Returns how many chapters were merged.
pub fn merge_into_comic(comic: &mut Comic, result: &ImportResult) -> usize {
    let mut merged = 0;
    for imported in &result.chapters {
        if imported.pages.is_empty() {
            debug!(folder = %imported.folder, "no surviving pages, chapter skipped");
            continue;
        }
        let number = imported
            .number
            .unwrap_or_else(|| comic.max_chapter_number().map_or(1.0, |max| max + 1.0));
        comic.upsert_chapter(Chapter::new(number, imported.pages.clone()));
        merged += 1;
    }
    merged
}
