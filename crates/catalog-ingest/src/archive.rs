use std::io::{Cursor, Read};

use bytes::Bytes;
use catalog_core::CatalogError;
use tracing::debug;
use zip::ZipArchive;

use crate::natural::natural_cmp;

/// Extensions accepted as page images. Anything else is skipped with a
/// warning.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Result of enumerating an archive, before any upload happens: chapters
/// grouped by top-level folder with pages already in natural order.
#[derive(Debug)]
pub struct ArchivePlan {
    pub chapters: Vec<PlannedChapter>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct PlannedChapter {
    pub folder: String,
    /// `None` means unnumbered; resolved to `max(existing) + 1` at merge.
    pub number: Option<f64>,
    pub pages: Vec<PlannedPage>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct PlannedPage {
    pub name: String,
    pub bytes: Bytes,
}

/// Enumerate a zip archive and group its entries into chapters.
///
/// Fails with `MalformedArchive` only when the archive cannot be opened or
/// walked at all; every per-entry problem degrades to a warning.
pub fn scan(archive_bytes: Vec<u8>) -> Result<ArchivePlan, CatalogError> {
    let mut zip = ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| CatalogError::MalformedArchive(format!("cannot open archive: {e}")))?;

    let mut warnings = Vec::new();
    let mut chapters: Vec<PlannedChapter> = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| CatalogError::MalformedArchive(format!("cannot read entry {index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let path = entry.name().to_string();
        let Some((folder, _)) = path.split_once('/') else {
            warnings.push(format!("{path}: not inside a chapter folder, skipped"));
            continue;
        };
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();

        let chapter = match chapters.iter_mut().find(|c| c.folder == folder) {
            Some(chapter) => chapter,
            None => {
                let number = extract_chapter_number(folder);
                debug!(folder, ?number, "new chapter folder");
                chapters.push(PlannedChapter {
                    folder: folder.to_string(),
                    number,
                    pages: Vec::new(),
                    warnings: Vec::new(),
                });
                chapters.last_mut().expect("just pushed")
            }
        };

        if !has_image_extension(&name) {
            chapter
                .warnings
                .push(format!("{path}: not an image, skipped"));
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        match entry.read_to_end(&mut bytes) {
            Ok(_) => chapter.pages.push(PlannedPage {
                name,
                bytes: Bytes::from(bytes),
            }),
            Err(e) => chapter
                .warnings
                .push(format!("{path}: unreadable entry, skipped: {e}")),
        }
    }

    for chapter in &mut chapters {
        chapter.pages.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    }
    chapters.sort_by(|a, b| natural_cmp(&a.folder, &b.folder));

    Ok(ArchivePlan { chapters, warnings })
}

fn has_image_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Extract a chapter number from a folder name by scanning for the first
/// numeric token, integer or decimal: `"Chapter 2.5"` → `2.5`. Folders
/// with no digits are unnumbered.
pub fn extract_chapter_number(folder: &str) -> Option<f64> {
    let bytes = folder.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    // Optional fractional part: a dot followed by at least one digit.
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    folder[start..end].parse().ok()
}

/// Build a small zip in memory. Test helper shared across this crate.
#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
