//! The filesystem store engine.
//!
//! `FileStore` keeps each key's live value as a plain file under the root
//! and records an immutable snapshot in the key's history directory on
//! every write that changes the value. Unchanged writes touch only the
//! live file and report no new version.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use kozane_core::{
    clock::SystemClock,
    traits::is_head,
    types::{compare_versions, parse_version},
    Clock, Error, KeyValueStore, Meta, Metrics, Result, StoreConfig, VersionRecord,
};

use crate::history::{self, Flow, HistoryEntry};
use crate::{fsck, key, props, META_SUFFIX, PAGE_PREFIX};

/// Filesystem-backed implementation of [`KeyValueStore`].
pub struct FileStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl FileStore {
    /// Open a store rooted at `root_dir`. The directory is created lazily
    /// by the first write.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(StoreConfig::new(root_dir))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            metrics: Metrics::new(),
        }
    }

    /// Replace the time source used to stamp snapshots.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Collect per-key fsck/cleanup errors instead of aborting on the
    /// first one.
    pub fn ignore_warnings(mut self, ignore: bool) -> Self {
        self.config.ignore_warnings = ignore;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn root(&self) -> &Path {
        &self.config.root_dir
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn live_path(&self, key: &str) -> PathBuf {
        key::live_path(self.root(), key)
    }

    pub(crate) fn history_dir(&self, key: &str) -> PathBuf {
        key::history_dir(self.root(), key)
    }

    /// Read a key's live bytes; a missing file is [`Error::KeyNotFound`].
    pub(crate) async fn read_live(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.live_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::KeyNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(Error::io(format!("reading live value of key '{key}'"), e)),
        }
    }

    /// Probe every `p_*` page for a file named `version`. `Ok(None)` means
    /// no page holds it; per-page stat failures are joined into an error.
    async fn search_version_in_pages(
        &self,
        history_dir: &Path,
        version: &str,
    ) -> Result<Option<PathBuf>> {
        let mut entries = match fs::read_dir(history_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::io(
                    format!("reading history directory '{}'", history_dir.display()),
                    e,
                ))
            }
        };

        let mut errors = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    errors.push(Error::io("reading history directory", e));
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir || !name.starts_with(PAGE_PREFIX) {
                continue;
            }

            let candidate = entry.path().join(version);
            match fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => return Ok(Some(candidate)),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => errors.push(Error::io(
                    format!("checking history '{}'", candidate.display()),
                    e,
                )),
            }
        }

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Locate the snapshot file for `version`: default location first, then
    /// the pages. Absent everywhere is [`Error::VersionNotFound`].
    async fn resolve_version_file(
        &self,
        key: &str,
        history_dir: &Path,
        version: &str,
    ) -> Result<PathBuf> {
        let default = history_dir.join(version);
        match fs::metadata(&default).await {
            Ok(meta) if meta.is_file() => return Ok(default),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::io(
                    format!("checking history '{}'", default.display()),
                    e,
                ))
            }
        }

        match self.search_version_in_pages(history_dir, version).await? {
            Some(path) => Ok(path),
            None => Err(Error::VersionNotFound {
                key: key.to_string(),
                version: version.to_string(),
            }),
        }
    }

    /// Enumerate a key's snapshots as bare records (no metadata loaded),
    /// ascending by version.
    async fn read_histories(&self, history_dir: &Path) -> Result<Vec<VersionRecord>> {
        let (entries, errors) = history::collect_histories(history_dir).await;
        if let Some(e) = Error::join(errors) {
            return Err(e);
        }

        let mut records: Vec<VersionRecord> = entries
            .into_iter()
            .map(|entry| VersionRecord {
                name: entry.name,
                version: entry.version,
                meta: None,
                has_meta: entry.has_meta,
            })
            .collect();
        records.sort_by(|a, b| compare_versions(&a.version, &b.version));
        Ok(records)
    }

    /// Resolve the snapshot name a meta write targets. `head` resolves to
    /// the newest snapshot, materialising one from the live value when the
    /// history is empty; an explicit version must already exist.
    async fn resolve_meta_target(&self, key: &str, version: &str) -> Result<PathBuf> {
        let history_dir = self.history_dir(key);

        if is_head(version) {
            let name = match self.get_last_version(key).await {
                Ok(last) => last.name,
                Err(e) if e.is_not_found() => {
                    ensure_history_record(self, key, &history_dir, self.clock.now_nanos()).await?
                }
                Err(e) => return Err(e),
            };
            return Ok(history_dir.join(name));
        }

        self.resolve_version_file(key, &history_dir, version).await
    }
}

/// Write a snapshot for `key` named by `timestamp_ns`, taking the content
/// from the live value. Free-standing so both the engine's head-meta path
/// and the fsck backfill phase can share it without the call graph looping
/// back through the trait.
pub(crate) async fn ensure_history_record(
    store: &FileStore,
    key: &str,
    history_dir: &Path,
    timestamp_ns: i64,
) -> Result<String> {
    let version = timestamp_ns.to_string();
    let snapshot = history_dir.join(&version);
    let value = store.read_live(key).await?;

    match fs::write(&snapshot, &value).await {
        Ok(()) => Ok(version),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(history_dir)
                .await
                .map_err(|e| Error::io("creating history directory", e))?;
            fs::write(&snapshot, &value)
                .await
                .map_err(|e| Error::io(format!("writing history file '{}'", snapshot.display()), e))?;
            Ok(version)
        }
        Err(e) => Err(Error::io(
            format!("writing history file '{}'", snapshot.display()),
            e,
        )),
    }
}

pub(crate) fn meta_path(snapshot: &Path) -> PathBuf {
    let mut os = snapshot.as_os_str().to_owned();
    os.push(META_SUFFIX);
    PathBuf::from(os)
}

/// Delete a snapshot and, when present, its meta companion. Missing files
/// are tolerated; other failures land in `errors`.
async fn remove_snapshot(entry: &HistoryEntry, errors: &mut Vec<Error>) {
    match fs::remove_file(&entry.path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => errors.push(Error::io(
            format!("removing history file '{}'", entry.path.display()),
            e,
        )),
    }
    if entry.has_meta {
        let meta = meta_path(&entry.path);
        match fs::remove_file(&meta).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => errors.push(Error::io(
                format!("removing meta file '{}'", meta.display()),
                e,
            )),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        key::validate_key(key)?;
        let data = self.read_live(key).await?;
        self.metrics.record_get();
        Ok(Bytes::from(data))
    }

    async fn get_by_version(&self, key: &str, version: &str) -> Result<Bytes> {
        if is_head(version) {
            return self.get(key).await;
        }
        key::validate_key(key)?;

        let history_dir = self.history_dir(key);
        let snapshot = self.resolve_version_file(key, &history_dir, version).await?;
        match fs::read(&snapshot).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) => Err(Error::io(
                format!("reading history '{}'", snapshot.display()),
                e,
            )),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<Option<String>> {
        let now = self.clock.now_nanos();
        self.set_with_timestamp(key, value, now).await
    }

    async fn set_with_timestamp(
        &self,
        key: &str,
        value: &[u8],
        timestamp_ns: i64,
    ) -> Result<Option<String>> {
        key::validate_key(key)?;

        let live = self.live_path(key);
        let changed = match fs::read(&live).await {
            Ok(existing) => existing != value,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                return Err(Error::io(
                    format!("reading live value of key '{key}' for comparison"),
                    e,
                ))
            }
        };

        if let Some(parent) = live.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("creating data directory", e))?;
        }
        fs::write(&live, value)
            .await
            .map_err(|e| Error::io(format!("writing live value of key '{key}'"), e))?;

        self.metrics.record_set(changed);
        if !changed {
            debug!(key, "value unchanged, no snapshot recorded");
            return Ok(None);
        }

        let history_dir = self.history_dir(key);
        fs::create_dir_all(&history_dir)
            .await
            .map_err(|e| Error::io("creating history directory", e))?;

        // Probe for a free snapshot name: `<ts>`, then `<ts>_1`, `<ts>_2`, …
        let timestamp = timestamp_ns.to_string();
        let mut name = timestamp.clone();
        let mut counter = 0u32;
        loop {
            let candidate = history_dir.join(&name);
            let exists = fs::try_exists(&candidate)
                .await
                .map_err(|e| Error::io("checking history file", e))?;
            if !exists {
                fs::write(&candidate, value)
                    .await
                    .map_err(|e| Error::io(format!("writing history file '{}'", candidate.display()), e))?;
                break;
            }
            counter += 1;
            name = format!("{timestamp}_{counter}");
        }

        debug!(key, version = %name, "snapshot recorded");
        Ok(Some(name))
    }

    async fn set_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()> {
        key::validate_key(key)?;
        let snapshot = self.resolve_meta_target(key, version).await?;
        props::write_props(&meta_path(&snapshot), meta).await
    }

    async fn update_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()> {
        key::validate_key(key)?;
        let snapshot = self.resolve_meta_target(key, version).await?;
        let meta_file = meta_path(&snapshot);

        let mut merged = props::read_props(&meta_file).await?;
        for (k, v) in meta {
            merged.insert(k.clone(), v.clone());
        }
        props::write_props(&meta_file, &merged).await
    }

    async fn delete(&self, key: &str, remove_histories: bool) -> Result<()> {
        key::validate_key(key)?;

        let live = self.live_path(key);
        let metadata = match fs::metadata(&live).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::io(
                    format!("checking existence of key '{key}'"),
                    e,
                ))
            }
        };
        if metadata.is_dir() {
            return Err(Error::HasChildren {
                key: key.to_string(),
            });
        }

        if remove_histories {
            match fs::remove_dir_all(self.history_dir(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io("removing history directory", e)),
            }
        }

        fs::remove_file(&live)
            .await
            .map_err(|e| Error::io(format!("removing live value of key '{key}'"), e))?;
        self.metrics.record_delete();
        debug!(key, remove_histories, "key deleted");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        key::validate_key(key)?;
        match fs::metadata(self.live_path(key)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(
                format!("checking existence of key '{key}'"),
                e,
            )),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(self.root().to_path_buf(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A store that has never been written to has no root yet.
                Err(e) if e.kind() == ErrorKind::NotFound && rel.is_empty() => return Ok(keys),
                Err(e) => {
                    return Err(Error::io(
                        format!("walking directory '{}'", dir.display()),
                        e,
                    ))
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::io(format!("walking directory '{}'", dir.display()), e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.')
                    || name.starts_with(PAGE_PREFIX)
                    || name.ends_with(crate::HISTORY_DIR_SUFFIX)
                {
                    continue;
                }

                let rel_path = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };

                let file_type = entry.file_type().await.map_err(|e| {
                    Error::io(format!("walking directory '{}'", dir.display()), e)
                })?;
                if file_type.is_dir() {
                    // Descend only while the directory can still reach keys
                    // matching the filter.
                    if rel_path.len() <= prefix.len() || rel_path.starts_with(prefix) {
                        pending.push((entry.path(), rel_path));
                    }
                } else if rel_path.starts_with(prefix) {
                    keys.push(rel_path);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get_histories(&self, key: &str) -> Result<Vec<VersionRecord>> {
        key::validate_key(key)?;

        let history_dir = self.history_dir(key);
        let mut records = self.read_histories(&history_dir).await?;
        for record in &mut records {
            if record.has_meta {
                let meta_file = meta_path(&history_dir.join(&record.name));
                record.meta = Some(props::read_props(&meta_file).await?);
            }
        }
        Ok(records)
    }

    async fn get_last_version(&self, key: &str) -> Result<VersionRecord> {
        key::validate_key(key)?;

        let history_dir = self.history_dir(key);
        let mut best: Option<(i64, HistoryEntry)> = None;
        let errors = history::for_each_history(&history_dir, |entry| {
            // Only names that parse as a plain integer compete; anything
            // else, collision-suffixed names included, is ignored here.
            if let Ok(timestamp) = entry.version.parse::<i64>() {
                let newer = match &best {
                    Some((current, _)) => timestamp > *current,
                    None => true,
                };
                if newer {
                    best = Some((timestamp, entry));
                }
            }
            Ok(Flow::Continue)
        })
        .await;
        if let Some(e) = Error::join(errors) {
            return Err(e);
        }

        let Some((timestamp, entry)) = best else {
            return Err(Error::NoHistory {
                key: key.to_string(),
            });
        };

        let meta = if entry.has_meta {
            Some(props::read_props(&meta_path(&entry.path)).await?)
        } else {
            None
        };
        Ok(VersionRecord {
            name: entry.name,
            version: timestamp.to_string(),
            meta,
            has_meta: entry.has_meta,
        })
    }

    async fn get_prev_version(&self, key: &str, revision: &str) -> Result<VersionRecord> {
        key::validate_key(key)?;

        let histories = self.read_histories(&self.history_dir(key)).await?;
        if histories.is_empty() {
            return Err(Error::NoHistory {
                key: key.to_string(),
            });
        }

        let target = if is_head(revision) {
            histories.len() - 1
        } else {
            histories
                .iter()
                .position(|record| record.version == revision)
                .ok_or_else(|| Error::VersionNotFound {
                    key: key.to_string(),
                    version: revision.to_string(),
                })?
        };

        if target == 0 {
            return Err(Error::NoPrevVersion {
                key: key.to_string(),
            });
        }
        Ok(histories[target - 1].clone())
    }

    async fn get_next_version(&self, key: &str, revision: &str) -> Result<VersionRecord> {
        key::validate_key(key)?;
        if is_head(revision) {
            // The newest snapshot has no successor.
            return Err(Error::NoNextVersion {
                key: key.to_string(),
            });
        }

        let histories = self.read_histories(&self.history_dir(key)).await?;
        if histories.is_empty() {
            return Err(Error::NoHistory {
                key: key.to_string(),
            });
        }

        let target = histories
            .iter()
            .position(|record| record.version == revision)
            .ok_or_else(|| Error::VersionNotFound {
                key: key.to_string(),
                version: revision.to_string(),
            })?;

        if target == histories.len() - 1 {
            return Err(Error::NoNextVersion {
                key: key.to_string(),
            });
        }
        Ok(histories[target + 1].clone())
    }

    /// The cutoff is `now - max_age` in nanoseconds, matching the unit of
    /// snapshot names.
    async fn cleanup_histories_by_time(&self, key: &str, max_age: Duration) -> Result<()> {
        key::validate_key(key)?;

        let cutoff = self.clock.now_nanos() - max_age.as_nanos() as i64;
        let mut doomed = Vec::new();
        let mut errors = history::for_each_history(&self.history_dir(key), |entry| {
            if let Some((timestamp, _)) = parse_version(&entry.version) {
                if timestamp < cutoff {
                    doomed.push(entry);
                }
            }
            Ok(Flow::Continue)
        })
        .await;

        let removed = doomed.len();
        for entry in &doomed {
            remove_snapshot(entry, &mut errors).await;
        }
        if removed > 0 {
            debug!(key, removed, "expired snapshots removed");
        }

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn cleanup_histories_by_count(&self, key: &str, max_count: usize) -> Result<()> {
        key::validate_key(key)?;

        let history_dir = self.history_dir(key);
        let mut all = Vec::new();
        let errors = history::for_each_history(&history_dir, |entry| {
            all.push(entry);
            Ok(Flow::Continue)
        })
        .await;
        if let Some(e) = Error::join(errors) {
            return Err(e);
        }

        if all.len() <= max_count {
            return Ok(());
        }
        all.sort_by(|a, b| compare_versions(&a.version, &b.version));
        let excess = all.len() - max_count;

        let mut errors = Vec::new();
        for entry in &all[..excess] {
            remove_snapshot(entry, &mut errors).await;
        }
        debug!(key, removed = excess, kept = max_count, "history trimmed by count");

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fsck(&self) -> Result<()> {
        fsck::run(self).await
    }
}
