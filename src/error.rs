use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io::Error as IoError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the stream control plane
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Stream not found")]
    NotFound,

    #[error("Too many active streams (limit {0})")]
    TooManyStreams(usize),

    /// Only ever recorded in the per-stream log
    #[error("transcoder not found: {}", .0.display())]
    ExternalToolMissing(PathBuf),

    /// Only ever recorded in the per-stream log
    #[error("{0}")]
    UnexpectedSubprocessFailure(IoError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl StreamError {
    /// Classify a spawn failure of the transcoder binary
    pub fn from_spawn(error: IoError, program: PathBuf) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => StreamError::ExternalToolMissing(program),
            _ => StreamError::UnexpectedSubprocessFailure(error),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StreamError::NotFound => StatusCode::NOT_FOUND,
            StreamError::TooManyStreams(_) => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::ExternalToolMissing(_)
            | StreamError::UnexpectedSubprocessFailure(_)
            | StreamError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StreamError::InvalidRequest("Missing RTSP URL".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(StreamError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            StreamError::TooManyStreams(2).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(StreamError::NotFound.to_string(), "Stream not found");
    }

    #[test]
    fn test_spawn_error_classification() {
        let missing = StreamError::from_spawn(
            IoError::new(ErrorKind::NotFound, "no such file"),
            PathBuf::from("ffmpeg"),
        );
        assert!(matches!(missing, StreamError::ExternalToolMissing(_)));
        assert_eq!(missing.to_string(), "transcoder not found: ffmpeg");

        let denied = StreamError::from_spawn(
            IoError::new(ErrorKind::PermissionDenied, "denied"),
            PathBuf::from("ffmpeg"),
        );
        assert!(matches!(denied, StreamError::UnexpectedSubprocessFailure(_)));
    }
}
