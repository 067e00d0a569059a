//! CSI error types.
//!
//! All failures in this crate are represented by the [`CsiError`] enum, which
//! derives [`thiserror::Error`] for ergonomic error handling and implements
//! [`Serialize`]/[`Deserialize`] so errors can travel the transport layer.
//! Each variant maps to exactly one CSI gRPC status code via
//! [`CsiError::code`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum CsiError {
    /// A required field is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested volume does not exist in the cloud inventory.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The requested snapshot does not exist in the cloud inventory.
    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    /// Some other entity (node, device link, path) is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// A name collision with incompatible attributes, or a bound target
    /// already serving a different source.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operation conflicts with the volume's current state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Per-node volume cap reached or no topology can be satisfied.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A requested capacity falls outside the allowed range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A polling ceiling was hit before the cloud converged.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A concurrent conflicting operation owns the volume.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The caller's cancellation token was observed.
    #[error("operation canceled: {0}")]
    Canceled(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        path: String,
        reason: String,
    },

    /// The cloud API failed after exhausted retries.
    #[error("cloud API error: {0}")]
    Cloud(String),

    /// A wire / socket-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The CSI gRPC status code a [`CsiError`] surfaces as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    ResourceExhausted,
    OutOfRange,
    DeadlineExceeded,
    Aborted,
    Canceled,
    Internal,
}

impl CsiError {
    /// The outward CSI status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::VolumeNotFound(_) | Self::SnapshotNotFound(_) | Self::NotFound(_) => {
                ErrorCode::NotFound
            }
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Self::OutOfRange(_) => ErrorCode::OutOfRange,
            Self::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            Self::Aborted(_) => ErrorCode::Aborted,
            Self::Canceled(_) => ErrorCode::Canceled,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::Cloud(_)
            | Self::Transport(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CsiError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CsiError::VolumeNotFound("vol-123".into());
        assert_eq!(err.to_string(), "volume vol-123 not found");
    }

    #[test]
    fn error_serde_round_trip() {
        let err = CsiError::MountFailed {
            path: "/mnt/test".into(),
            reason: "permission denied".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CsiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }

    #[test]
    fn code_mapping() {
        assert_eq!(
            CsiError::InvalidArgument("x".into()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(CsiError::VolumeNotFound("v".into()).code(), ErrorCode::NotFound);
        assert_eq!(CsiError::NotFound("node n".into()).code(), ErrorCode::NotFound);
        assert_eq!(
            CsiError::MountFailed {
                path: "/p".into(),
                reason: "busy".into()
            }
            .code(),
            ErrorCode::Internal
        );
        assert_eq!(CsiError::Cloud("503".into()).code(), ErrorCode::Internal);
        assert_eq!(CsiError::Canceled("rpc".into()).code(), ErrorCode::Canceled);
        assert_eq!(CsiError::OutOfRange("size".into()).code(), ErrorCode::OutOfRange);
    }
}
