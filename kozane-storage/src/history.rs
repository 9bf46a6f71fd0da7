//! History directory traversal.
//!
//! A history directory holds snapshot files, their `.meta` companions, and
//! up to one level of `p_*` page subdirectories. The traversal pairs each
//! snapshot with its meta file *within the same directory level*, descends
//! into pages exactly once (pages never nest), skips hidden entries, and
//! yields nothing for a missing directory.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use kozane_core::{Error, Result};

use crate::{META_SUFFIX, PAGE_PREFIX};

/// One live snapshot found under a history directory.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Full path of the snapshot file.
    pub path: PathBuf,
    /// Location-qualified name: `<version>` or `p_<oldest>/<version>`.
    pub name: String,
    /// The bare version string (the file name).
    pub version: String,
    /// Whether a `.meta` companion sits next to the snapshot.
    pub has_meta: bool,
}

/// Callback verdict: keep visiting or short-circuit the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// What one directory level contains, after classification.
#[derive(Default)]
struct LevelListing {
    snapshots: Vec<String>,
    metas: HashSet<String>,
    pages: Vec<String>,
}

/// Read and classify the direct entries of one directory level.
///
/// A missing directory is an empty listing; other read failures are pushed
/// onto `errors` and also yield an empty listing so the traversal can keep
/// going.
async fn read_level(dir: &Path, collect_pages: bool, errors: &mut Vec<Error>) -> LevelListing {
    let mut listing = LevelListing::default();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return listing,
        Err(e) => {
            errors.push(Error::io(
                format!("reading history directory '{}'", dir.display()),
                e,
            ));
            return listing;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                errors.push(Error::io(
                    format!("reading history directory '{}'", dir.display()),
                    e,
                ));
                break;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = match entry.file_type().await {
            Ok(ft) => ft.is_dir(),
            Err(e) => {
                errors.push(Error::io(format!("classifying entry '{name}'"), e));
                continue;
            }
        };

        if is_dir {
            if collect_pages && name.starts_with(PAGE_PREFIX) {
                listing.pages.push(name);
            }
            continue;
        }
        if name.starts_with('.') {
            continue;
        }
        if let Some(stripped) = name.strip_suffix(META_SUFFIX) {
            listing.metas.insert(stripped.to_string());
            continue;
        }
        listing.snapshots.push(name);
    }

    // Directory read order is platform-dependent; keep it deterministic.
    listing.snapshots.sort();
    listing.pages.sort();
    listing
}

/// Visit every live snapshot under `dir`, page contents first, then the
/// default location. The callback may return [`Flow::Stop`] to
/// short-circuit; errors it returns are collected, not fatal. The returned
/// list holds every per-entry error encountered along the way.
pub async fn for_each_history<F>(dir: &Path, mut callback: F) -> Vec<Error>
where
    F: FnMut(HistoryEntry) -> Result<Flow>,
{
    let mut errors = Vec::new();
    let top = read_level(dir, true, &mut errors).await;

    for page in &top.pages {
        let page_dir = dir.join(page);
        let level = read_level(&page_dir, false, &mut errors).await;
        for version in &level.snapshots {
            let entry = HistoryEntry {
                path: page_dir.join(version),
                name: format!("{page}/{version}"),
                version: version.clone(),
                has_meta: level.metas.contains(version),
            };
            match callback(entry) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return errors,
                Err(e) => errors.push(e),
            }
        }
    }

    for version in &top.snapshots {
        let entry = HistoryEntry {
            path: dir.join(version),
            name: version.clone(),
            version: version.clone(),
            has_meta: top.metas.contains(version),
        };
        match callback(entry) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => return errors,
            Err(e) => errors.push(e),
        }
    }

    errors
}

/// Collect every snapshot entry under `dir` along with traversal errors.
pub async fn collect_histories(dir: &Path) -> (Vec<HistoryEntry>, Vec<Error>) {
    let mut entries = Vec::new();
    let errors = for_each_history(dir, |entry| {
        entries.push(entry);
        Ok(Flow::Continue)
    })
    .await;
    (entries, errors)
}
