use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the persistence layer. Expected outcomes such as duplicate
/// check-ins or stale location reports are reported through outcome enums
/// in [`crate::store`], never through this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found")]
    NotFound,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("latitude {0} outside [-90, 90]")]
    InvalidLatitude(f64),

    #[error("longitude {0} outside [-180, 180]")]
    InvalidLongitude(f64),

    #[error("missing vehicle id")]
    MissingVehicle,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("Failed to record attendance. Please try again.")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Failed to send SOS alert. Please try again.")]
    Create(#[source] StoreError),

    #[error("Failed to resolve alert. Please try again.")]
    Resolve(#[source] StoreError),

    #[error("alert {0} not found")]
    NotFound(Uuid),
}

/// Errors of the client side of the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("event channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A client frame that failed boundary validation.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("empty {0}")]
    EmptyField(&'static str),
}

/// Raw device payloads that could not be turned into a location report.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("message missing device id")]
    MissingDevice,

    #[error("invalid GPS_DATETIME: '{0}'")]
    InvalidTimestamp(String),

    #[error("message has no GPS fix and no ignition change")]
    MissingCoordinates,
}

/// Errors returned by the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_)
            | ApiError::Store(StoreError::NotFound)
            | ApiError::Alert(AlertError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Attendance(_) | ApiError::Alert(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
