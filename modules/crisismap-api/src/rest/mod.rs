//! JSON endpoints for external clients (API keys) and the map viewer.

use serde::Deserialize;

use crisismap_model::authorization;
use crisismap_store::AuthorizationRecord;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub mod maps;
pub mod reports;
pub mod votes;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeyParams {
    pub key: String,
}

/// The enabled authorization record for `key`.
pub async fn require_authorization(state: &AppState, key: &str) -> ApiResult<AuthorizationRecord> {
    if key.is_empty() {
        return Err(ApiError::Forbidden("Missing API key.".to_string()));
    }
    authorization::get(key, &state.deps)
        .await?
        .filter(|auth| auth.is_enabled)
        .ok_or_else(|| ApiError::Forbidden("Invalid or disabled API key.".to_string()))
}
