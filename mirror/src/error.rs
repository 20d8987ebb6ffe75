//! Error types for the mirror

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rpc_core::RpcError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Coarse classification used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Parse,
    Indexing,
    Validation,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Parse => "parse",
            ErrorKind::Indexing => "indexing",
            ErrorKind::Validation => "validation",
            ErrorKind::Other => "other",
        }
    }
}

impl MirrorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::Rpc(RpcError::Connection(_)) => ErrorKind::Connection,
            MirrorError::Rpc(RpcError::Deserialization(_)) | MirrorError::Parse(_) => ErrorKind::Parse,
            MirrorError::Database(_) | MirrorError::InvalidInput(_) => ErrorKind::Indexing,
            MirrorError::Validation(_) => ErrorKind::Validation,
            MirrorError::Rpc(_)
            | MirrorError::Io(_)
            | MirrorError::Config(_)
            | MirrorError::Internal(_) => ErrorKind::Other,
        }
    }
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            MirrorError::Database(_) => (StatusCode::SERVICE_UNAVAILABLE, "Database error"),
            MirrorError::Rpc(_) => (StatusCode::BAD_GATEWAY, "RPC error"),
            MirrorError::Parse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Parse error"),
            MirrorError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO error"),
            MirrorError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error"),
            MirrorError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
            MirrorError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation error"),
            MirrorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
