use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::warn;

use crisismap_model::ModelError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{0}")]
    BadRequest(String),

    /// Missing or unknown API key.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Model(ModelError::Validation(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Model(ModelError::NotAuthorized { .. }) | ApiError::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Model(ModelError::ReadOnly(_)) => StatusCode::CONFLICT,
            ApiError::Model(ModelError::NotFound(_)) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Model(ModelError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            warn!(error = %self, "Request failed");
            "Internal error".to_string()
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crisismap_common::Role;

    #[test]
    fn model_errors_map_to_statuses() {
        let denied = ModelError::NotAuthorized {
            uid: "u".into(),
            role: Role::MapViewer,
            target: "map \"m\"".into(),
        };
        assert_eq!(ApiError::from(denied).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::from(ModelError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ModelError::ReadOnly("EmptyMap")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ModelError::NotFound("version".into())).status(),
            StatusCode::NOT_FOUND
        );
    }
}
