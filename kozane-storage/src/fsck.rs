//! Self-repair for the on-disk layout.
//!
//! Three sequential, idempotent phases:
//!
//! 1. **Orphan removal** — history directories whose key has no live value
//!    are deleted.
//! 2. **Pagination** — a history directory holding too many snapshots in
//!    its default location gets its oldest snapshots grouped into
//!    `p_<oldest>` subdirectories of exactly [`PAGE_CAPACITY`] entries;
//!    the newest snapshot always stays in the default location.
//! 3. **Backfill** — a live key with no snapshot at all gets one created
//!    from its current value.
//!
//! With `ignore_warnings` set on the store, per-key failures are collected
//! and returned joined at the end; otherwise the first failure aborts.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use kozane_core::{types::compare_versions, Clock, Error, KeyValueStore, Result};

use crate::history::{self, Flow};
use crate::key;
use crate::store::{ensure_history_record, meta_path, FileStore};
use crate::{HISTORY_DIR_SUFFIX, HISTORY_ROOT, PAGE_CAPACITY, PAGE_PREFIX};

/// Per-key error policy: collect under `ignore_warnings`, abort otherwise.
struct WarningSink {
    ignore: bool,
    errors: Vec<Error>,
}

impl WarningSink {
    fn new(ignore: bool) -> Self {
        Self {
            ignore,
            errors: Vec::new(),
        }
    }

    fn report(&mut self, error: Error) -> Result<()> {
        if self.ignore {
            warn!(%error, "fsck warning");
            self.errors.push(error);
            Ok(())
        } else {
            Err(error)
        }
    }

    fn finish(self) -> Result<()> {
        match Error::join(self.errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub(crate) async fn run(store: &FileStore) -> Result<()> {
    store.metrics().record_fsck_run();
    let mut sink = WarningSink::new(store.config().ignore_warnings);

    let orphans = remove_orphaned_histories(store, &mut sink).await?;
    let pages = paginate_histories(store, &mut sink).await?;
    let backfilled = backfill_missing_histories(store, &mut sink).await?;

    store
        .metrics()
        .record_fsck_repairs((orphans + pages + backfilled) as u64);
    info!(orphans, pages, backfilled, "fsck completed");
    sink.finish()
}

/// Phase 1: walk the `.history` tree and drop every `.h` directory whose
/// key no longer has a live value. `.h` directories are never descended
/// into; their subdirectories are pages, not further keys.
async fn remove_orphaned_histories(store: &FileStore, sink: &mut WarningSink) -> Result<usize> {
    let history_root = store.root().join(HISTORY_ROOT);
    let mut removed = 0usize;
    let mut pending: Vec<(PathBuf, String)> = vec![(history_root, String::new())];

    while let Some((dir, rel)) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(Error::io(
                    format!("walking history tree '{}'", dir.display()),
                    e,
                ))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(format!("walking history tree '{}'", dir.display()), e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let rel_path = if rel.is_empty() {
                name.clone()
            } else {
                format!("{rel}/{name}")
            };

            if !name.ends_with(HISTORY_DIR_SUFFIX) {
                // An intermediate namespace directory; keep descending.
                pending.push((entry.path(), rel_path));
                continue;
            }

            let key_path = rel_path
                .strip_suffix(HISTORY_DIR_SUFFIX)
                .unwrap_or(&rel_path)
                .to_string();
            match store.exists(&key_path).await {
                Ok(true) => {}
                Ok(false) => match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        removed += 1;
                        info!(key = %key_path, "removed orphaned history");
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => sink.report(Error::io(
                        format!("removing orphaned history '{}'", entry.path().display()),
                        e,
                    ))?,
                },
                Err(e) => sink.report(e)?,
            }
        }
    }

    Ok(removed)
}

/// Phase 2: page oversized history directories, one key at a time.
async fn paginate_histories(store: &FileStore, sink: &mut WarningSink) -> Result<usize> {
    let keys = store.list_keys("").await?;
    let mut pages_created = 0usize;

    for key_name in keys {
        if let Err(e) = key::validate_key(&key_name) {
            sink.report(e)?;
            continue;
        }
        match paginate_history_dir(&store.history_dir(&key_name)).await {
            Ok(created) => {
                if created > 0 {
                    debug!(key = %key_name, pages = created, "history paginated");
                }
                pages_created += created;
            }
            Err(e) => sink.report(e)?,
        }
    }

    Ok(pages_created)
}

/// Group the oldest default-location snapshots of one history directory
/// into pages of exactly [`PAGE_CAPACITY`], moving files by rename.
/// Existing pages are left alone; the newest snapshot stays put.
async fn paginate_history_dir(dir: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(Error::io(
                format!("reading history directory '{}'", dir.display()),
                e,
            ))
        }
    };

    let mut snapshots = Vec::new();
    let mut metas = HashSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io(format!("reading history directory '{}'", dir.display()), e))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|ft| ft.is_dir())
            .unwrap_or(false);
        if is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if let Some(stripped) = name.strip_suffix(crate::META_SUFFIX) {
            metas.insert(stripped.to_string());
            continue;
        }
        snapshots.push(name);
    }

    snapshots.sort_by(|a, b| compare_versions(a, b));
    if snapshots.len() > 1 {
        // The newest snapshot is never paged away.
        snapshots.pop();
    }

    let mut remaining = snapshots.as_slice();
    let mut created = 0usize;
    while remaining.len() >= PAGE_CAPACITY {
        let (page, rest) = remaining.split_at(PAGE_CAPACITY);
        let page_dir = dir.join(format!("{PAGE_PREFIX}{}", page[0]));
        fs::create_dir_all(&page_dir)
            .await
            .map_err(|e| Error::io(format!("creating page directory '{}'", page_dir.display()), e))?;

        for name in page {
            let old = dir.join(name);
            let new = page_dir.join(name);
            fs::rename(&old, &new).await.map_err(|e| {
                Error::io(
                    format!("moving history file '{}' to '{}'", old.display(), new.display()),
                    e,
                )
            })?;

            if metas.contains(name) {
                let old_meta = meta_path(&old);
                let new_meta = meta_path(&new);
                match fs::rename(&old_meta, &new_meta).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::io(
                            format!("moving meta file '{}'", old_meta.display()),
                            e,
                        ))
                    }
                }
            }
        }

        created += 1;
        remaining = rest;
    }

    Ok(created)
}

/// Phase 3: make sure every live key has at least one snapshot, creating
/// one from the current value where the history is empty.
async fn backfill_missing_histories(store: &FileStore, sink: &mut WarningSink) -> Result<usize> {
    let keys = store.list_keys("").await?;
    let mut backfilled = 0usize;

    for key_name in keys {
        if let Err(e) = key::validate_key(&key_name) {
            sink.report(e)?;
            continue;
        }

        let history_dir = store.history_dir(&key_name);
        let mut found = false;
        let errors = history::for_each_history(&history_dir, |_| {
            found = true;
            Ok(Flow::Stop)
        })
        .await;
        for e in errors {
            sink.report(e)?;
        }
        if found {
            continue;
        }

        let timestamp = store.clock().now_nanos();
        match ensure_history_record(store, &key_name, &history_dir, timestamp).await {
            Ok(version) => {
                backfilled += 1;
                debug!(key = %key_name, version = %version, "backfilled missing history");
            }
            Err(e) => sink.report(e)?,
        }
    }

    Ok(backfilled)
}
