use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CatalogError;

/// Wire schema generation understood by this build.
pub const SCHEMA_VERSION: u32 = 3;

/// Opaque identifier for bytes stored through the blob gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the blob service stored the image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Re-encoded by the transport (photo uploads).
    Compressed,
    /// Byte-exact original (document uploads).
    Original,
}

/// A single page in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 0-based position within the chapter; contiguous per invariant.
    pub seq: u32,
    pub blob_ref: BlobRef,
    pub kind: MediaKind,
    /// Unknown wire fields, preserved across round trips.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl Page {
    pub fn new(seq: u32, blob_ref: BlobRef, kind: MediaKind) -> Self {
        Self {
            seq,
            blob_ref,
            kind,
            extra: Map::new(),
        }
    }
}

/// A chapter: decimal number unique within its comic, pages in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub number: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub pages: Vec<Page>,
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl Chapter {
    pub fn new(number: f64, pages: Vec<Page>) -> Self {
        Self {
            number,
            title: None,
            pages,
            extra: Map::new(),
        }
    }
}

/// A comic: unique slug id, metadata, chapters sorted ascending by number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comic {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<BlobRef>,
    pub chapters: Vec<Chapter>,
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl Comic {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: slugify(&title),
            title,
            description: description.into(),
            cover: None,
            chapters: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn chapter(&self, number: f64) -> Option<&Chapter> {
        self.chapters
            .iter()
            .find(|c| c.number.total_cmp(&number).is_eq())
    }

    /// Highest chapter number present, if any.
    pub fn max_chapter_number(&self) -> Option<f64> {
        self.chapters
            .iter()
            .map(|c| c.number)
            .max_by(f64::total_cmp)
    }

    /// Replace the chapter with the same number, or insert keeping the
    /// ascending sort. Replacement swaps out the pages entirely.
    pub fn upsert_chapter(&mut self, chapter: Chapter) {
        match self
            .chapters
            .binary_search_by(|c| c.number.total_cmp(&chapter.number))
        {
            Ok(idx) => self.chapters[idx] = chapter,
            Err(idx) => self.chapters.insert(idx, chapter),
        }
    }

    /// Remove the chapter with the given number. Returns whether it existed.
    pub fn remove_chapter(&mut self, number: f64) -> bool {
        match self
            .chapters
            .binary_search_by(|c| c.number.total_cmp(&number))
        {
            Ok(idx) => {
                self.chapters.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn page_count(&self) -> usize {
        self.chapters.iter().map(|c| c.pages.len()).sum()
    }
}

/// Read-only counts over a document snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub comics: usize,
    pub chapters: usize,
    pub pages: usize,
}

/// The root aggregate. Exactly one instance exists, owned by the catalog
/// store; everything else sees immutable snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub schema_version: u32,
    /// Monotonic; mirrors the slot version the document was committed at.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub comics: Vec<Comic>,
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl CatalogDocument {
    /// Fresh empty document at version 0 (slot never written).
    pub fn empty() -> Self {
        Self::empty_at(0)
    }

    /// Fresh empty document adopting an existing slot version, used when
    /// recovering from unparsable slot content.
    pub fn empty_at(version: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            version,
            updated_at: Utc::now(),
            comics: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn comic(&self, id: &str) -> Option<&Comic> {
        self.comics.iter().find(|c| c.id == id)
    }

    pub fn comic_mut(&mut self, id: &str) -> Option<&mut Comic> {
        self.comics.iter_mut().find(|c| c.id == id)
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            comics: self.comics.len(),
            chapters: self.comics.iter().map(|c| c.chapters.len()).sum(),
            pages: self.comics.iter().map(Comic::page_count).sum(),
        }
    }

    /// Check every structural invariant:
    /// - comic ids non-empty and unique across the document
    /// - chapter numbers finite and strictly ascending within each comic
    ///   (which also makes them unique)
    /// - page `seq` values a contiguous 0-based run per chapter
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut ids = HashSet::new();
        for comic in &self.comics {
            if comic.id.is_empty() {
                return Err(CatalogError::Validation(format!(
                    "comic {:?} has an empty id",
                    comic.title
                )));
            }
            if !ids.insert(comic.id.as_str()) {
                return Err(CatalogError::Validation(format!(
                    "duplicate comic id {:?}",
                    comic.id
                )));
            }
            for pair in comic.chapters.windows(2) {
                if pair[0].number.total_cmp(&pair[1].number).is_ge() {
                    return Err(CatalogError::Validation(format!(
                        "comic {:?}: chapters not strictly ascending at {} / {}",
                        comic.id, pair[0].number, pair[1].number
                    )));
                }
            }
            for chapter in &comic.chapters {
                if !chapter.number.is_finite() {
                    return Err(CatalogError::Validation(format!(
                        "comic {:?}: non-finite chapter number",
                        comic.id
                    )));
                }
                for (idx, page) in chapter.pages.iter().enumerate() {
                    if page.seq as usize != idx {
                        return Err(CatalogError::Validation(format!(
                            "comic {:?} chapter {}: page seq {} at position {}",
                            comic.id, chapter.number, page.seq, idx
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Derive a comic id from its title: lowercase, keep word characters
/// (alphanumeric and underscore), drop everything else, collapse whitespace
/// and hyphen runs to a single hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
        } else if ch.is_whitespace() || ch == '-' {
            pending_sep = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(seq: u32) -> Page {
        Page::new(seq, BlobRef::new(format!("blob-{seq}")), MediaKind::Original)
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("One Piece"), "one-piece");
        assert_eq!(slugify("  Dr. STONE!! "), "dr-stone");
        assert_eq!(slugify("20th Century Boys"), "20th-century-boys");
        // Underscores are word characters, not separators.
        assert_eq!(slugify("a_b - c"), "a_b-c");
        assert_eq!(slugify("snake_case title"), "snake_case-title");
    }

    #[test]
    fn validate_accepts_well_formed_document() {
        let mut doc = CatalogDocument::empty();
        let mut comic = Comic::new("Test", "desc");
        comic.upsert_chapter(Chapter::new(1.0, vec![page(0), page(1)]));
        comic.upsert_chapter(Chapter::new(2.5, vec![page(0)]));
        doc.comics.push(comic);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_comic_ids() {
        let mut doc = CatalogDocument::empty();
        doc.comics.push(Comic::new("Same", "a"));
        doc.comics.push(Comic::new("Same", "b"));
        assert!(matches!(
            doc.validate(),
            Err(CatalogError::Validation(msg)) if msg.contains("duplicate comic id")
        ));
    }

    #[test]
    fn validate_rejects_duplicate_chapter_numbers() {
        let mut doc = CatalogDocument::empty();
        let mut comic = Comic::new("Test", "desc");
        comic.chapters.push(Chapter::new(1.0, vec![]));
        comic.chapters.push(Chapter::new(1.0, vec![]));
        doc.comics.push(comic);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_rejects_gapped_page_sequence() {
        let mut doc = CatalogDocument::empty();
        let mut comic = Comic::new("Test", "desc");
        comic
            .chapters
            .push(Chapter::new(1.0, vec![page(0), page(2)]));
        doc.comics.push(comic);
        assert!(matches!(
            doc.validate(),
            Err(CatalogError::Validation(msg)) if msg.contains("page seq")
        ));
    }

    #[test]
    fn upsert_chapter_replaces_matching_number() {
        let mut comic = Comic::new("Test", "desc");
        comic.upsert_chapter(Chapter::new(2.0, vec![page(0), page(1)]));
        comic.upsert_chapter(Chapter::new(1.0, vec![page(0)]));
        comic.upsert_chapter(Chapter::new(2.0, vec![page(0)]));

        let numbers: Vec<f64> = comic.chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1.0, 2.0]);
        assert_eq!(comic.chapter(2.0).unwrap().pages.len(), 1);
    }

    #[test]
    fn max_chapter_number_handles_decimals() {
        let mut comic = Comic::new("Test", "desc");
        assert_eq!(comic.max_chapter_number(), None);
        comic.upsert_chapter(Chapter::new(1.0, vec![]));
        comic.upsert_chapter(Chapter::new(2.5, vec![]));
        assert_eq!(comic.max_chapter_number(), Some(2.5));
    }

    #[test]
    fn stats_counts_all_levels() {
        let mut doc = CatalogDocument::empty();
        let mut comic = Comic::new("Test", "desc");
        comic.upsert_chapter(Chapter::new(1.0, vec![page(0), page(1)]));
        comic.upsert_chapter(Chapter::new(2.0, vec![page(0)]));
        doc.comics.push(comic);
        doc.comics.push(Comic::new("Empty", "desc"));

        let stats = doc.stats();
        assert_eq!(stats.comics, 2);
        assert_eq!(stats.chapters, 2);
        assert_eq!(stats.pages, 3);
    }
}
