//! Logical remote operations.
//!
//! Rate limiting and circuit state are scoped per [`Endpoint`], never
//! globally, so a failing operation cannot starve unrelated ones.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A named logical operation on the remote metadata registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Look up a version record by file hash (primary lookup).
    VersionByHash,
    /// Fetch a parent model record by id.
    Model,
    /// Fetch a version record by id.
    Version,
    /// Query the image listing endpoint.
    Images,
}

impl Endpoint {
    /// Every endpoint, in a stable order. Used to pre-build per-endpoint
    /// limiter and breaker state so lookups never mutate a shared map.
    pub const ALL: [Endpoint; 4] = [
        Endpoint::VersionByHash,
        Endpoint::Model,
        Endpoint::Version,
        Endpoint::Images,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionByHash => "version_by_hash",
            Self::Model => "model",
            Self::Version => "version",
            Self::Images => "images",
        }
    }

    /// URL path segment under the API base.
    pub const fn path(self) -> &'static str {
        match self {
            Self::VersionByHash => "model-versions/by-hash",
            Self::Model => "models",
            Self::Version => "model-versions",
            Self::Images => "images",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
