//! # Store Contract
//!
//! The [`KeyValueStore`] trait is the full operation surface of a Kozane
//! store. The filesystem engine implements it directly and the read-cache
//! decorator wraps any implementation of it.
//!
//! Cancellation: every filesystem touch inside an implementation is an
//! `.await` point, so dropping a pending future cancels the operation
//! between I/O calls. Partially applied mutations are not rolled back;
//! `fsck` run to completion restores the on-disk invariants.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::{types::Meta, Result, VersionRecord};

/// Symbolic version referring to the latest value or newest snapshot.
pub const HEAD: &str = "head";

/// True for either casing of the symbolic head version.
pub fn is_head(version: &str) -> bool {
    version == "head" || version == "HEAD"
}

/// A versioned key-value store with per-key history and metadata.
///
/// Keys are `/`-separated hierarchical paths, values are opaque bytes.
/// Every value-changing write records an immutable snapshot stamped with a
/// nanosecond timestamp; unchanged writes are no-ops that record nothing.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Latest value of `key`. Missing keys are an error, not an empty value.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Value of `key` at `version`. `head`/`HEAD` reads the live value;
    /// anything else is looked up in the key's history, pages included.
    async fn get_by_version(&self, key: &str, version: &str) -> Result<Bytes>;

    /// Write `value` and record a snapshot stamped with the store clock.
    ///
    /// Returns the new snapshot's name, or `None` when `value` equals the
    /// current bytes and no snapshot was recorded.
    async fn set(&self, key: &str, value: &[u8]) -> Result<Option<String>>;

    /// [`set`](Self::set) with a caller-supplied nanosecond timestamp.
    async fn set_with_timestamp(
        &self,
        key: &str,
        value: &[u8],
        timestamp_ns: i64,
    ) -> Result<Option<String>>;

    /// Replace the metadata of a snapshot. `head`/`HEAD` targets the newest
    /// snapshot, materialising one from the live value if the history is
    /// empty.
    async fn set_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()>;

    /// Merge `meta` into a snapshot's existing metadata; new entries
    /// override old ones, other entries are kept.
    async fn update_meta(&self, key: &str, version: &str, meta: &Meta) -> Result<()>;

    /// Remove a key's live value. Deleting a key that has child keys fails;
    /// deleting a missing key succeeds silently. With `remove_histories`
    /// the key's history directory is removed as well.
    async fn delete(&self, key: &str, remove_histories: bool) -> Result<()>;

    /// Whether `key` has a live value. A pure namespace node yields false.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, root-relative with `/` separators.
    /// Reserved entries (`.history`, hidden names, pages, history dirs)
    /// never appear.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// All snapshots of `key`, ascending by version, with metadata attached
    /// where present.
    async fn get_histories(&self, key: &str) -> Result<Vec<VersionRecord>>;

    /// The newest snapshot of `key`, with metadata attached when present.
    async fn get_last_version(&self, key: &str) -> Result<VersionRecord>;

    /// The snapshot immediately before `revision` (`head` means the newest
    /// snapshot, so its predecessor).
    async fn get_prev_version(&self, key: &str, revision: &str) -> Result<VersionRecord>;

    /// The snapshot immediately after `revision`. `head` has no successor.
    async fn get_next_version(&self, key: &str, revision: &str) -> Result<VersionRecord>;

    /// Delete snapshots older than `max_age` before the store clock's now.
    /// The cutoff is computed in nanoseconds, the unit snapshot names carry.
    async fn cleanup_histories_by_time(&self, key: &str, max_age: Duration) -> Result<()>;

    /// Keep only the newest `max_count` snapshots of `key`.
    async fn cleanup_histories_by_count(&self, key: &str, max_count: usize) -> Result<()>;

    /// Repair the on-disk layout: drop orphaned histories, page oversized
    /// history directories, and backfill a snapshot for live keys that
    /// have none.
    async fn fsck(&self) -> Result<()>;
}
