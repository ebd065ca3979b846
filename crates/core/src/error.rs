// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for VisionKit.
//!
//! Every fallible core operation returns [`VisionKitError`]. The variants are
//! the caller-visible error kinds; the HTTP adapter maps kinds to status codes
//! through a single table, so nothing below this layer needs to know about
//! transport concerns.

use thiserror::Error;

/// Main error type for VisionKit operations.
#[derive(Debug, Error)]
pub enum VisionKitError {
    /// Bad caller input: empty required field, value out of range, unknown
    /// solution id, unknown template id, malformed body.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown instance id, config path, node id, template id or line/area id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate id on create, or an attempt to mutate or delete an in-use
    /// resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The global instance cap has been reached. Carries the cap and the
    /// current count so the caller can surface a hint payload.
    #[error("Instance limit reached: {current} of {cap} instances in use")]
    AdmissionDenied { cap: usize, current: usize },

    /// Operation attempted on the wrong lifecycle state (e.g. start on a
    /// broken graph).
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A required external resource is missing or unreadable: model file,
    /// font, display. Never retried automatically by the core.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Transient I/O such as broker connect failures or engine start races.
    /// Logged and retried in background; callers usually still see success.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// I/O error (file operations, persistence).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Programmer error. Never returned by contract.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using [`VisionKitError`].
pub type Result<T> = std::result::Result<T, VisionKitError>;

/// Stable error-class labels used in JSON error bodies.
impl VisionKitError {
    pub const fn class(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "Bad Request",
            Self::NotFound(_) => "Not Found",
            Self::Conflict(_) => "Conflict",
            Self::AdmissionDenied { .. } => "Too Many Requests",
            Self::PreconditionFailed(_) => "Precondition Failed",
            Self::DependencyUnavailable(_)
            | Self::TransientIo(_)
            | Self::Io(_)
            | Self::Internal(_) => "Internal Server Error",
        }
    }
}

impl From<VisionKitError> for String {
    fn from(err: VisionKitError) -> Self {
        err.to_string()
    }
}
