//! # Kozane Core
//!
//! Shared building blocks for the Kozane versioned key-value store:
//! - The [`KeyValueStore`] contract every store implementation satisfies
//! - Error types covering the full operation surface
//! - Version records and the version-name total order
//! - The clock seam used to stamp snapshots
//! - Store configuration and operation metrics

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use traits::KeyValueStore;
pub use types::{Meta, VersionRecord};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
