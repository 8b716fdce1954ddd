//! CSI error types.
//!
//! Every failure the node plugin reports is a [`CsiError`]. Errors derive
//! [`thiserror::Error`] for ergonomic propagation and [`Serialize`] /
//! [`Deserialize`] so they can travel across the QUIC transport. Together
//! with [`CsiError::kind`] the `Display` text forms the (kind, message) pair
//! callers see.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse error classification mirrored from the CSI status codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unusable; retrying it unchanged will fail again.
    InvalidArgument,
    /// The addressed path or object does not exist.
    NotFound,
    /// Another operation owns the volume; retry after backoff.
    Aborted,
    /// The operation failed on this node.
    Internal,
    /// The peer could not be reached.
    Unavailable,
}

/// Unified error type for node plugin operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// A required request field is missing or has an unsupported value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The volume ID does not contain the `#`-separated segments it must.
    #[error("error parsing volume id {id:?}: {reason}")]
    MalformedIdentity {
        /// The volume ID as received.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Neither the volume attributes nor the volume ID named a container.
    #[error("could not find container name from attributes or volume id {0:?}")]
    MissingContainerName(String),

    /// Another stage/unstage call for the same volume is in flight.
    #[error("an operation with the given volume id {0} already exists")]
    OperationInProgress(String),

    /// Every credential source was exhausted without usable key material.
    #[error("credential resolution failed: {0}")]
    CredentialResolutionFailed(String),

    /// The mount helper (or kernel mount) returned an error.
    #[error("mount failed at {path}: {reason}")]
    MountExecutionFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Rollback could not return the target to an unmounted state.
    #[error("{path} is still mounted after rollback ({reason}); retry the whole operation")]
    Unrecoverable {
        /// The target that remains mounted.
        path: String,
        /// The original mount failure.
        reason: String,
    },

    /// An unmount or mount-point cleanup failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The addressed path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Classify the error into the [`ErrorKind`] reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::MalformedIdentity { .. }
            | Self::MissingContainerName(_) => ErrorKind::InvalidArgument,
            Self::OperationInProgress(_) => ErrorKind::Aborted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TransportError(_) => ErrorKind::Unavailable,
            Self::CredentialResolutionFailed(_)
            | Self::MountExecutionFailed { .. }
            | Self::Unrecoverable { .. }
            | Self::UnmountFailed { .. }
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::InvalidArgument`].
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
