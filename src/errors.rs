use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the connection configuration subsystem.
///
/// Secret material must never appear in any variant: messages are built
/// from URLs, indices and static reasons only.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("base URL '{url}' is not in the configured allow-list")]
    UrlNotAllowed { url: String },

    #[error("invalid key edit at position {index}: {reason}")]
    InvalidKeyEdit { index: usize, reason: &'static str },

    #[error("connection index {index} out of range (list has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Key material no longer matches a stored ciphertext. This is
    /// unrecoverable for that record and is never retried.
    #[error("failed to decrypt stored secret: encryption key material changed")]
    Decryption,

    #[error("connection lists misaligned: {detail}")]
    MisalignedLists { detail: String },

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::UrlNotAllowed { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "url_not_allowed",
                self.to_string(),
            ),
            AppError::InvalidKeyEdit { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_key_edit",
                self.to_string(),
            ),
            AppError::IndexOutOfRange { .. } => (
                StatusCode::CONFLICT,
                "conflict_error",
                "index_out_of_range",
                format!("{}; refresh the connection list and retry", self),
            ),
            AppError::Decryption => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "decryption_failed",
                self.to_string(),
            ),
            AppError::MisalignedLists { detail } => {
                tracing::error!("connection list invariant breach: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "misaligned_lists",
                    "internal configuration state is inconsistent".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
