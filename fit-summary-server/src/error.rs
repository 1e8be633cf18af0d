use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fit_summary_api::api::ErrorResponse;

/// Everything that ends a request early.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to parse form: {0}")]
    Form(String),
    #[error("Upload exceeds the limit of {0} bytes")]
    TooLarge(usize),
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("File not specified")]
    MissingParameter,
    #[error("Invalid query: {0}")]
    Query(String),
    #[error("Invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("Failed to save file: {0}")]
    Save(#[source] std::io::Error),
    #[error("Failed to start processor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to process file: exit code {code}\n{output}")]
    ProcessorFailed { code: i32, output: String },
    #[error("Processor did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Processed file not found")]
    OutputMissing,
    #[error("Failed to access processed file: {0}")]
    Output(#[source] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Form(_)
            | AppError::MissingFile
            | AppError::MissingParameter
            | AppError::Query(_)
            | AppError::InvalidName { .. } => StatusCode::BAD_REQUEST,
            AppError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Save(_)
            | AppError::Spawn(_)
            | AppError::ProcessorFailed { .. }
            | AppError::OutputMissing
            | AppError::Output(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a multipart error, keeping the body limit apart from malformed input.
    pub fn from_multipart(e: &MultipartError, limit: usize) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::TooLarge(limit)
        } else {
            AppError::Form(e.body_text())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!(status = status.as_u16(); "{self}");
        } else {
            log::info!(status = status.as_u16(); "{self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_errors() {
        assert_eq!(AppError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::MissingParameter.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TooLarge(1).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            AppError::OutputMissing.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Query(String::new()).status(), StatusCode::BAD_REQUEST);
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(
            AppError::Output(denied).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn processor_failure_keeps_output() {
        let e = AppError::ProcessorFailed {
            code: 2,
            output: String::from("Traceback: boom"),
        };
        let message = e.to_string();
        assert!(message.contains("exit code 2"));
        assert!(message.contains("Traceback: boom"));
    }
}
