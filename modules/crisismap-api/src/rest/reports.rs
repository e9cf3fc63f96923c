use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crisismap_common::GeoPoint;
use crisismap_model::{authorization, reports, NewCrowdReport};
use crisismap_store::CrowdReportRecord;

use super::{require_authorization, KeyParams};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const DEFAULT_SEARCH_COUNT: usize = 100;
const MAX_SEARCH_COUNT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub id: Option<String>,
    pub source: String,
    pub author: String,
    pub effective: Option<DateTime<Utc>>,
    pub text: String,
    #[serde(default)]
    pub topic_ids: Vec<String>,
    #[serde(default)]
    pub answers: Value,
    pub location: Option<GeoPoint>,
    pub map_id: String,
    pub place_id: Option<String>,
}

/// Stores a crowd report posted by an external source.
pub async fn api_create_report(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KeyParams>,
    Json(body): Json<ReportRequest>,
) -> ApiResult<(StatusCode, Json<CrowdReportRecord>)> {
    let auth = require_authorization(&state, &params.key).await?;
    authorization::check_crowd_report_write(&auth, &body.source, Some(&body.map_id), &body.author)?;

    let report = reports::create(
        NewCrowdReport {
            id: body.id,
            source: body.source,
            author: body.author,
            effective: body.effective.unwrap_or_else(Utc::now),
            text: body.text,
            topic_ids: body.topic_ids,
            answers: body.answers,
            location: body.location,
            submitted: None,
            map_id: Some(body.map_id),
            place_id: body.place_id,
        },
        &state.deps,
    )
    .await?;
    info!(report_id = %report.id, organization = %auth.organization_name, "Report accepted via API key");
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub q: String,
    pub count: Option<usize>,
    pub max_updated: Option<DateTime<Utc>>,
}

/// Structured report search, limited to reports on maps the caller can view.
pub async fn api_search_reports(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<CrowdReportRecord>>> {
    if params.q.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing query.".to_string()));
    }
    let count = params
        .count
        .unwrap_or(DEFAULT_SEARCH_COUNT)
        .min(MAX_SEARCH_COUNT);
    let found = reports::search(&user, &params.q, count, params.max_updated, &state.deps).await?;
    Ok(Json(found))
}
