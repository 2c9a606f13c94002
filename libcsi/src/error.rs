//! Errors and protocol status codes.
//!
//! Every failure a service role can report is a [`CsiError`].  It is serde
//! encodable so a reply frame can carry it, and [`CsiError::code`] gives the
//! status the orchestrator acts on.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol status codes.
///
/// Numbering matches the gRPC status codes the CSI protocol is defined
/// against, so logs and metrics line up with what a CO reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Some entity that we attempted to create already exists.
    AlreadyExists = 6,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
}

impl Code {
    /// Stable, upper-case name used in log fields and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by any CSI operation.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The requested volume already exists with incompatible parameters.
    #[error("volume {0} already exists")]
    VolumeAlreadyExists(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// Staging or publishing failed on the node.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        path: String,
        /// Which phase failed, and why.
        reason: String,
    },

    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        path: String,
        reason: String,
    },

    /// The object-storage backend returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A socket / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The RPC is not implemented by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The plugin is not ready to serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Anything else the plugin could not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// The protocol status code reported for this error.
    pub fn code(&self) -> Code {
        match self {
            Self::VolumeAlreadyExists(_) => Code::AlreadyExists,
            Self::VolumeNotFound(_) => Code::NotFound,
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::TransportError(_) | Self::Unavailable(_) => Code::Unavailable,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => Code::Internal,
        }
    }

    /// Create a [`CsiError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a [`CsiError::Unimplemented`] naming the RPC.
    pub fn unimplemented(rpc: &str) -> Self {
        Self::Unimplemented(format!("{rpc} is not implemented"))
    }

    /// Wrap a storage backend failure.
    pub fn backend<E: fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Wrap a socket or framing failure.
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}
