use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crisismap_model::redirect;

use crate::AppState;

/// 302 to the URL stored under `key`, or to `/` when there is none.
pub async fn redirect_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    let target = match redirect::get(&key, &state.deps).await {
        Ok(Some(url)) => url,
        Ok(None) => "/".to_string(),
        Err(e) => {
            warn!(key = %key, error = %e, "Redirection lookup failed");
            "/".to_string()
        }
    };
    (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
}
