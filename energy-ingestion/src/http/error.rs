use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::{BatchError, TelemetryError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_records: Option<usize>,
}

impl TelemetryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Partition(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Partition(_) => "partition_error",
            Self::Storage(_) => "storage_error",
        }
    }

    fn body(&self) -> ErrorResponse {
        ErrorResponse {
            status: "error",
            error: self.code(),
            message: self.to_string(),
            committed_chunks: None,
            committed_records: None,
        }
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

impl BatchError {
    fn body(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
            committed_chunks: Some(self.committed_chunks),
            committed_records: Some(self.committed_records),
            ..self.source.body()
        }
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        (self.source.status_code(), Json(self.body())).into_response()
    }
}

impl From<JsonRejection> for TelemetryError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for TelemetryError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}
