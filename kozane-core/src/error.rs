//! # Error Handling
//!
//! Error types for Kozane store operations.
//!
//! The variants map one-to-one onto the failure kinds of the store
//! contract: key syntax violations, the three not-found flavours (missing
//! key, missing version, empty history), the namespace delete guard,
//! wrapped filesystem failures, and the joined form produced by fsck and
//! cleanup passes running in ignore-warnings mode.

use thiserror::Error;

/// Result type alias for Kozane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Kozane stores
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("key '{key}' not found")]
    KeyNotFound { key: String },

    #[error("version '{version}' not found for key '{key}'")]
    VersionNotFound { key: String, version: String },

    #[error("no history found for key '{key}'")]
    NoHistory { key: String },

    #[error("no previous version found for key '{key}'")]
    NoPrevVersion { key: String },

    #[error("no next version found for key '{key}'")]
    NoNextVersion { key: String },

    #[error("cannot delete key '{key}': it has child keys")]
    HasChildren { key: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("multiple errors: {}", format_multi(.0))]
    Multi(Vec<Error>),
}

fn format_multi(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap a filesystem error with a contextual message.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// True for every not-found flavour: missing key, missing version,
    /// empty history, or a missing neighbour in history navigation.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound { .. }
                | Error::VersionNotFound { .. }
                | Error::NoHistory { .. }
                | Error::NoPrevVersion { .. }
                | Error::NoNextVersion { .. }
        )
    }

    /// Collapse a list of collected errors: `None` when the list is empty,
    /// the sole error when there is one, [`Error::Multi`] otherwise.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(Error::Multi(errors)),
        }
    }
}
