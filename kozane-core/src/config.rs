//! # Configuration
//!
//! Configuration for a Kozane store instance. A store is fully
//! parameterised by its root directory; there is no process-wide state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory holding live values and the `.history` tree.
    pub root_dir: PathBuf,
    /// When true, fsck and cleanup passes collect per-key errors and return
    /// them joined at the end instead of aborting on the first failure.
    pub ignore_warnings: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
            ignore_warnings: false,
        }
    }
}

impl StoreConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }
}
