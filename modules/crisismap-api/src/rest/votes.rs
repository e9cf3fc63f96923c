use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crisismap_common::VoteType;
use crisismap_model::{reports, votes};

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Anonymous voter names live under this prefix so they can never collide
/// with a signed-in user's ID.
pub const ANONYMOUS_VOTER_PREFIX: &str = "anon:";

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub report_id: String,
    /// `None` retracts the voter's earlier vote.
    pub vote_type: Option<VoteType>,
    /// Identifies anonymous voters, e.g. a voter URL. Ignored for signed-in
    /// users, who vote as themselves.
    pub voter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub report_id: String,
    pub upvote_count: i64,
    pub downvote_count: i64,
    pub score: f64,
    pub hidden: bool,
}

pub async fn api_vote(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    let voter = if user.is_anonymous() {
        let name = body
            .voter
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing voter.".to_string()))?;
        format!("{ANONYMOUS_VOTER_PREFIX}{name}")
    } else {
        user.id.clone()
    };
    let not_found = || ApiError::NotFound(format!("No report {:?}", body.report_id));

    let report = reports::get(&user, &body.report_id, &state.deps)
        .await?
        .ok_or_else(not_found)?;
    votes::assert_can_cast(&user, &report, body.vote_type, &state.deps).await?;
    votes::put(&report.id, &voter, body.vote_type, &state.deps).await?;

    let report = reports::get(&user, &body.report_id, &state.deps)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(VoteResponse {
        report_id: report.id,
        upvote_count: report.upvote_count,
        downvote_count: report.downvote_count,
        score: report.score,
        hidden: report.hidden,
    }))
}
