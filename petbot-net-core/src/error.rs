//! Error taxonomy shared by the components.
//!
//! Storage and network errors are recovered by the supervisor (they push the
//! machine towards the portal), DNS protocol errors only ever cause a packet
//! to be dropped, and HTTP errors become status-coded responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no entry matches")]
    NotFound,

    #[error("credential store is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(&'static str),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("no saved network is visible")]
    NoMatchingNetwork,

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("association failed: {0}")]
    AssociationFailed(String),

    #[error("access point failure: {0}")]
    AccessPoint(String),

    #[error("radio failure: {0}")]
    Radio(String),
}

/// Reasons a DNS datagram is dropped without an answer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("response would exceed {limit} bytes")]
    BufferOverflow { limit: usize },
}

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("invalid image size: {0}")]
    InvalidSize(String),

    #[error("another update is in progress")]
    Busy,

    #[error("write to update slot failed: {0}")]
    Write(String),

    #[error("image validation failed: {0}")]
    Validation(String),

    #[error("update slot I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-visible failures of the management API.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InternalError(String),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
            HttpError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

impl From<StorageError> for HttpError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => HttpError::NotFound("not found".into()),
            StorageError::CapacityExceeded { .. } => HttpError::InternalError(e.to_string()),
            other => HttpError::InternalError(format!("save failed: {}", other)),
        }
    }
}

impl From<OtaError> for HttpError {
    fn from(e: OtaError) -> Self {
        match e {
            OtaError::Busy => HttpError::Conflict(e.to_string()),
            OtaError::InvalidSize(_) => HttpError::BadRequest(e.to_string()),
            other => HttpError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_client_statuses() {
        assert_eq!(HttpError::from(StorageError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HttpError::from(StorageError::CapacityExceeded { capacity: 8 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn ota_busy_is_a_conflict() {
        assert_eq!(HttpError::from(OtaError::Busy).status(), StatusCode::CONFLICT);
        assert_eq!(
            HttpError::from(OtaError::InvalidSize("0 bytes".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
