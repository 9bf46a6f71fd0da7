//! Key syntax rules and on-disk path derivation.
//!
//! A key is a non-empty `/`-separated path. Parts must not collide with the
//! reserved on-disk names: no leading `.`, no leading `p_`, no trailing
//! `.h`. Keys never start with `/` and never contain `\`; empty parts from
//! adjacent slashes are tolerated but not canonicalised.

use std::path::{Path, PathBuf};

use kozane_core::{Error, Result};

use crate::{HISTORY_DIR_SUFFIX, HISTORY_ROOT, PAGE_PREFIX};

/// Validate a key against the syntax rules, before any I/O happens.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey {
            key: key.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(Error::InvalidKey {
            key: key.to_string(),
            reason: "must not start with '/' or contain '\\'".to_string(),
        });
    }

    for part in key.split('/') {
        if part.is_empty() {
            // Tolerated, e.g. "a//b".
            continue;
        }
        if part.starts_with('.')
            || part.starts_with(PAGE_PREFIX)
            || part.ends_with(HISTORY_DIR_SUFFIX)
        {
            return Err(Error::InvalidKey {
                key: key.to_string(),
                reason: format!(
                    "part '{part}' must not start with '.' or '{PAGE_PREFIX}' or end with '{HISTORY_DIR_SUFFIX}'"
                ),
            });
        }
    }
    Ok(())
}

/// Path of a key's live value file.
pub fn live_path(root: &Path, key: &str) -> PathBuf {
    root.join(key)
}

/// Path of a key's history directory: `<root>/.history/<key>.h`.
pub fn history_dir(root: &Path, key: &str) -> PathBuf {
    root.join(HISTORY_ROOT)
        .join(format!("{key}{HISTORY_DIR_SUFFIX}"))
}
