//! Bulk import of chronological value streams.
//!
//! Feeds `(key, bytes, timestamp)` records into a store in arrival order,
//! typically extracted from an external history such as a version-control
//! log. A record whose bytes match the previously imported revision of the
//! same key is skipped before it reaches the store, and the store's own
//! unchanged-write rule collapses any remaining duplicates, so equal
//! successive revisions never produce extra snapshots. Per-record failures
//! are collected without aborting the stream.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use kozane_core::{Error, KeyValueStore};

/// One revision of one key, stamped with its original timestamp.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub key: String,
    pub content: Bytes,
    /// Nanosecond timestamp used as the snapshot version.
    pub timestamp_ns: i64,
}

impl ImportRecord {
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>, timestamp_ns: i64) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            timestamp_ns,
        }
    }
}

/// Outcome of an import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Snapshot versions recorded per key, in import order.
    pub imported: HashMap<String, Vec<String>>,
    /// Per-record failures; the stream continues past them.
    pub errors: Vec<Error>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of snapshots recorded across all keys.
    pub fn snapshot_count(&self) -> usize {
        self.imported.values().map(Vec::len).sum()
    }
}

/// Per-record predicate deciding whether a record is imported.
pub type ImportFilter = dyn Fn(&str, i64) -> bool + Send + Sync;

/// Progress callback, invoked as `(processed, total)`.
pub type ImportProgress = dyn Fn(usize, usize) + Send + Sync;

/// Import `records` into `store` in order.
///
/// Records must arrive oldest first; each surviving record becomes a
/// `set_with_timestamp` call, so its timestamp names the snapshot.
pub async fn import_records<S>(
    store: &S,
    records: Vec<ImportRecord>,
    filter: Option<&ImportFilter>,
    progress: Option<&ImportProgress>,
) -> ImportReport
where
    S: KeyValueStore + ?Sized,
{
    let total = records.len();
    let mut report = ImportReport::default();
    let mut last_seen: HashMap<String, Bytes> = HashMap::new();

    for (index, record) in records.into_iter().enumerate() {
        if let Some(progress) = progress {
            progress(index, total);
        }
        if let Some(filter) = filter {
            if !filter(&record.key, record.timestamp_ns) {
                continue;
            }
        }
        // Unchanged since the previously imported revision of this key.
        if last_seen
            .get(&record.key)
            .is_some_and(|prev| *prev == record.content)
        {
            continue;
        }

        match store
            .set_with_timestamp(&record.key, &record.content, record.timestamp_ns)
            .await
        {
            Ok(Some(version)) => {
                debug!(key = %record.key, version = %version, "imported revision");
                report
                    .imported
                    .entry(record.key.clone())
                    .or_default()
                    .push(version);
                last_seen.insert(record.key, record.content);
            }
            Ok(None) => {
                last_seen.insert(record.key, record.content);
            }
            Err(e) => {
                warn!(key = %record.key, error = %e, "import record failed");
                report.errors.push(e);
            }
        }
    }

    if let Some(progress) = progress {
        progress(total, total);
    }
    report
}
