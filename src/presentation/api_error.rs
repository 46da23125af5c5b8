// Maps application errors onto HTTP responses
use crate::application::graph_service::GraphError;
use crate::application::readings_log::LogError;
use crate::application::recorder::RecorderError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RecorderError> for ApiError {
    fn from(e: RecorderError) -> Self {
        let (status, code) = match &e {
            RecorderError::DuplicateIdentifier(_) => (StatusCode::CONFLICT, "duplicate_identifier"),
            RecorderError::AlreadyStarted(_) => (StatusCode::CONFLICT, "already_started"),
            RecorderError::EmptyIdentifier => (StatusCode::BAD_REQUEST, "empty_identifier"),
            RecorderError::AtCapacity { .. } => (StatusCode::TOO_MANY_REQUESTS, "at_capacity"),
            RecorderError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RecorderError::Resource(_) => (StatusCode::INTERNAL_SERVER_ERROR, "resource_unavailable"),
            RecorderError::WriterClosed => (StatusCode::SERVICE_UNAVAILABLE, "writer_closed"),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        let code = match &e {
            LogError::OutputMissing { .. } => "output_missing",
            LogError::PermissionDenied { .. } => "permission_denied",
            LogError::Io { .. } | LogError::Csv { .. } => "log_unreadable",
        };
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message: e.to_string(),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::AlreadyOpen => Self {
                status: StatusCode::CONFLICT,
                code: "graph_open",
                message: e.to_string(),
            },
            GraphError::NotOpen => Self {
                status: StatusCode::NOT_FOUND,
                code: "graph_not_open",
                message: e.to_string(),
            },
            GraphError::Log(log) => log.into(),
        }
    }
}
