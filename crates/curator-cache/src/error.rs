//! Cache error type.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the persistent tier.
///
/// Read-side corruption is intentionally *not* represented here: a
/// corrupt or unreadable record is logged and treated as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache record {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode cache record for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
