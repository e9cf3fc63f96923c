use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crisismap_model::Map;

use super::{require_authorization, KeyParams};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MapResponse {
    pub id: String,
    pub domain: String,
    pub title: String,
    pub description: String,
    pub updated: DateTime<Utc>,
    pub version_id: Option<i64>,
    pub map_root: Value,
}

/// The current MapRoot of a map the API key may read.
pub async fn api_map(
    State(state): State<Arc<AppState>>,
    Path(map_id): Path<String>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Json<MapResponse>> {
    let auth = require_authorization(&state, &params.key).await?;
    let map = Map::get_with_api_key(&auth, &map_id, &state.deps)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No map {map_id:?}")))?;
    let map_root = map.map_root(&state.deps).await?;
    let record = map.record;
    Ok(Json(MapResponse {
        id: record.id,
        domain: record.domain,
        title: record.title,
        description: record.description,
        updated: record.updated,
        version_id: record.current_version_id,
        map_root,
    }))
}
