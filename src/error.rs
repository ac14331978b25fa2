//! Error types for the EME spy
//!
//! Only interceptor *setup* can fail with a [`SpyError`]. Failures of the
//! native EME calls themselves are never converted: they travel through every
//! hook as the realm's own thrown value and reach the caller unchanged.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpyError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    InvalidTarget = 100,
    MissingMember = 101,

    // Host errors (2xx)
    HostOperationFailed = 200,
}

/// Why a spy could not be installed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpyError {
    /// The object handed to the object interceptor has no prototype.
    #[error("Invalid object: {0}")]
    InvalidTarget(String),

    /// A required member is absent (or not callable) on the target.
    #[error("No method in {0}")]
    MissingMember(String),

    /// Reading or redefining a member on the host object threw.
    #[error("Host operation failed on {path}: {message}")]
    Host { path: String, message: String },
}

impl SpyError {
    /// Wrap a value thrown by the realm while touching `path`.
    pub fn host(path: impl Into<String>, thrown: &impl std::fmt::Debug) -> Self {
        SpyError::Host {
            path: path.into(),
            message: format!("{:?}", thrown),
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            SpyError::InvalidTarget(_) => ErrorCode::InvalidTarget,
            SpyError::MissingMember(_) => ErrorCode::MissingMember,
            SpyError::Host { .. } => ErrorCode::HostOperationFailed,
        }
    }

    /// Whether the error comes from the roster not matching the host
    /// (as opposed to the host refusing an operation).
    pub fn is_configuration(&self) -> bool {
        matches!(self, SpyError::InvalidTarget(_) | SpyError::MissingMember(_))
    }
}
