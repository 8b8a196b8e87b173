use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use network::NetworkError;
use storage::StorageError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("All storage nodes are offline")]
    AllNodesOffline,

    #[error("Storage node {0} is offline")]
    NodeUnavailable(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A storage node already holds a blob under this name.
    #[error("Blob already exists: {0}")]
    BlobExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage node error: {0}")]
    NodeIo(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Front failures other than bad input, unknown objects and
    /// cancellation all answer 500; `code` tells them apart.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Canceled(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::BlobExists(_) => StatusCode::CONFLICT,
            ApiError::AlreadyExists(_)
            | ApiError::AllNodesOffline
            | ApiError::NodeUnavailable(_)
            | ApiError::NodeIo(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::AllNodesOffline => "AllNodesOffline",
            ApiError::NodeUnavailable(_) => "NodeUnavailable",
            ApiError::AlreadyExists(_) | ApiError::BlobExists(_) => "AlreadyExists",
            ApiError::NotFound(_) => "NotFound",
            ApiError::NodeIo(_) => "NodeIOError",
            ApiError::Canceled(_) => "Canceled",
            ApiError::Internal(_) => "InternalError",
        }
    }
}

impl From<NetworkError> for ApiError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::AllNodesOffline => ApiError::AllNodesOffline,
            NetworkError::NodeUnavailable(node) => ApiError::NodeUnavailable(node),
            NetworkError::AlreadyExists(what) => ApiError::AlreadyExists(what),
            NetworkError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::NodeIo(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            StorageError::AlreadyExists(what) => ApiError::BlobExists(what),
            StorageError::InvalidName(name) => {
                ApiError::Validation(format!("invalid blob name {name:?}"))
            }
            StorageError::Body(msg) => ApiError::Canceled(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        tracing::warn!(code, status = status.as_u16(), "Request failed: {}", message);

        let body = serde_json::json!({
            "code": code,
            "message": message,
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
