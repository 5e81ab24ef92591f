//! Errors returned by the HTTP handlers.
//!
//! Validation failures are reported to the caller as-is. Upload failures are
//! logged in full and answered with a generic message.

use crate::append::AppendError;
use crate::ingress::IngressError;
use crate::models::api::ErrorBody;
use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::{ error, warn };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("upload failed: {0}")]
    Upload(#[from] AppendError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ingress(IngressError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Ingress(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upload(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Ingress(e) => e.code(),
            ApiError::Unauthorized => "Unauthorized",
            ApiError::RateLimited => "RateLimited",
            ApiError::Upload(_) => "UploadFailed",
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ApiError::Ingress(IngressError::PayloadTooLarge { .. }) => "Payload too large",
            ApiError::Ingress(IngressError::InvalidBody(_)) => "Invalid JSON",
            ApiError::Ingress(IngressError::MissingFields) => "Missing required fields",
            ApiError::Ingress(IngressError::InvalidPlatform(_)) => "Invalid platform",
            ApiError::Ingress(IngressError::InvalidTurn { .. }) => "Invalid turn format",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::RateLimited => "Too many requests",
            ApiError::Upload(_) => "Upload failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upload(e) => error!("HF upload failed: {}", e),
            other => warn!("Rejected submission: {}", other),
        }
        let body = ErrorBody {
            error: self.client_message().to_string(),
            code: Some(self.code().to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(IngressError::MissingFields).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(IngressError::PayloadTooLarge { size: 2, limit: 1 }).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        let upload = ApiError::from(AppendError::Write(StoreError::Malformed("x".into())));
        assert_eq!(upload.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upload.code(), "UploadFailed");
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let upload = ApiError::from(AppendError::Read(StoreError::Http {
            status: 401,
            message: "token hf_secret rejected".into(),
        }));
        assert_eq!(upload.client_message(), "Upload failed");
    }
}
