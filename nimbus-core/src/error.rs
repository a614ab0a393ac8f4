use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced by the `nimbus-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A utilisation value was outside `[0.0, 100.0]` or not finite.
    #[error("invalid {metric} percentage {value}: must be in [0.0, 100.0]")]
    InvalidPercentage { metric: &'static str, value: f32 },

    /// A worker sample line was not valid JSON.
    #[error("malformed metrics sample: {0}")]
    MalformedSample(#[from] serde_json::Error),
}

/// Coarse classification shared by every error in the workspace.
///
/// Callers branch on the kind; the concrete error carries the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// The targeted VM, network, container or blob does not exist.
    NotFound,
    /// The target is already in the requested state, or already exists.
    Conflict,
    /// A container still holds blobs.
    NonEmpty,
    /// A worker ignored the terminate request and was force-killed.
    ///
    /// Reported alongside a successful outcome, never as a failure.
    TerminationTimeout,
    /// The network allocator was driven out of create, use, delete order.
    AllocationInconsistency,
    /// The request itself was malformed.
    InvalidInput,
    /// Spawn or I/O failure on the host.
    Internal,
}

impl ErrorKind {
    /// Stable snake-case name, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::NonEmpty => "non_empty",
            Self::TerminationTimeout => "termination_timeout",
            Self::AllocationInconsistency => "allocation_inconsistency",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
