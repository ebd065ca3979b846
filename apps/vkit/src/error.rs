// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error-kind to HTTP-status mapping.
//!
//! The single table translating [`VisionKitError`] kinds into responses.
//! Every error body has the shape `{"error": "<class>", "message": ...}`;
//! admission denials additionally carry the cap and current count as a
//! hint payload.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use visionkit_core::VisionKitError;

/// Wrapper giving core errors an HTTP rendering.
pub struct ApiError(pub VisionKitError);

impl From<VisionKitError> for ApiError {
    fn from(err: VisionKitError) -> Self {
        Self(err)
    }
}

const fn status_for(err: &VisionKitError) -> StatusCode {
    match err {
        VisionKitError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        VisionKitError::NotFound(_) => StatusCode::NOT_FOUND,
        VisionKitError::Conflict(_) => StatusCode::CONFLICT,
        VisionKitError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
        VisionKitError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        VisionKitError::DependencyUnavailable(_)
        | VisionKitError::TransientIo(_)
        | VisionKitError::Io(_)
        | VisionKitError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = match &self.0 {
            VisionKitError::AdmissionDenied { cap, current } => serde_json::json!({
                "error": self.0.class(),
                "message": self.0.to_string(),
                "cap": cap,
                "current": current,
            }),
            other => serde_json::json!({
                "error": other.class(),
                "message": other.to_string(),
            }),
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self.0, "Request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        assert_eq!(
            status_for(&VisionKitError::InvalidArgument("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&VisionKitError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&VisionKitError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&VisionKitError::AdmissionDenied { cap: 1, current: 1 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&VisionKitError::PreconditionFailed("x".into())),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for(&VisionKitError::DependencyUnavailable("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
