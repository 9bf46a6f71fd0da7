//! # Core Types
//!
//! Version records returned by history queries, plus the parsing and total
//! order for snapshot names.
//!
//! A snapshot name is a decimal nanosecond timestamp, optionally followed
//! by a `_<n>` collision suffix when two writes land on the same
//! nanosecond. The total order is structured: primary on the integer
//! prefix, secondary on the suffix with absent < 0 < 1 < …. Plain string
//! comparison only agrees with this order while all timestamps have the
//! same digit count, so every sort in the store goes through
//! [`compare_versions`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Snapshot metadata: a flat string-to-string property map.
pub type Meta = HashMap<String, String>;

/// One entry in a key's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Location-qualified snapshot name: `<version>` for the default
    /// location, `p_<oldest>/<version>` inside a page.
    pub name: String,
    /// The snapshot's version string (the bare file name).
    pub version: String,
    /// Metadata attached to the snapshot, when it has been loaded.
    pub meta: Option<Meta>,
    /// Whether a companion `.meta` file was observed next to the snapshot.
    pub has_meta: bool,
}

/// Parse a snapshot name into `(timestamp, collision_suffix)`.
///
/// Returns `None` for names that are not a decimal integer with an
/// optional `_<n>` tail; such files are ignored by version-ordered
/// operations.
pub fn parse_version(version: &str) -> Option<(i64, Option<u32>)> {
    match version.split_once('_') {
        None => version.parse::<i64>().ok().map(|ts| (ts, None)),
        Some((ts, suffix)) => {
            let ts = ts.parse::<i64>().ok()?;
            let suffix = suffix.parse::<u32>().ok()?;
            Some((ts, Some(suffix)))
        }
    }
}

/// Total order over snapshot names.
///
/// Both names parseable: structured comparison. Otherwise falls back to
/// plain string order so unparseable names still sort deterministically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(pa), Some(pb)) => pa.cmp(&pb),
        _ => a.cmp(b),
    }
}
