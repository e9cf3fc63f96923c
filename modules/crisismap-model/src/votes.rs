use std::collections::HashMap;

use crisismap_common::{Role, User, VoteType};
use crisismap_store::{CrowdReportRecord, CrowdVoteRecord};
use tracing::{info, warn};

use crate::deps::ModelDeps;
use crate::error::{ModelError, ModelResult};
use crate::maps::Map;
use crate::reports;

/// A stored vote with its type parsed. `vote_type` is `None` for a retracted
/// vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrowdVote {
    pub report_id: String,
    pub voter: String,
    pub vote_type: Option<VoteType>,
}

impl From<CrowdVoteRecord> for CrowdVote {
    fn from(record: CrowdVoteRecord) -> Self {
        let vote_type = record.vote_type.as_deref().and_then(|raw| match raw.parse() {
            Ok(vote_type) => Some(vote_type),
            Err(e) => {
                warn!(report_id = %record.report_id, error = %e, "Ignoring unknown vote type");
                None
            }
        });
        Self {
            report_id: record.report_id,
            voter: record.voter,
            vote_type,
        }
    }
}

/// The voter's vote on a report, if they have voted.
pub async fn get(report_id: &str, voter: &str, deps: &ModelDeps) -> ModelResult<Option<CrowdVote>> {
    Ok(deps.store.get_vote(report_id, voter).await?.map(CrowdVote::from))
}

/// The voter's votes on any of `report_ids`, keyed by report ID.
pub async fn get_multi(
    report_ids: &[String],
    voter: &str,
    deps: &ModelDeps,
) -> ModelResult<HashMap<String, CrowdVote>> {
    Ok(deps
        .store
        .get_votes(report_ids, voter)
        .await?
        .into_iter()
        .map(|record| (record.report_id.clone(), CrowdVote::from(record)))
        .collect())
}

/// Stores or replaces the voter's vote on a report. The report's tallies
/// are rewritten in the same unit, counting this pending change.
pub async fn put(
    report_id: &str,
    voter: &str,
    vote_type: Option<VoteType>,
    deps: &ModelDeps,
) -> ModelResult<()> {
    if reports::update_score(report_id, voter, vote_type, deps).await?.is_none() {
        return Err(ModelError::NotFound(format!("report {report_id:?}")));
    }
    info!(
        report_id,
        voter,
        vote_type = vote_type.map(|v| v.as_str()).unwrap_or("NONE"),
        "Vote recorded"
    );
    Ok(())
}

/// Reviewer votes require reviewer access to the report's map; anyone may
/// cast anonymous votes on a report they can see.
pub async fn assert_can_cast(
    user: &User,
    report: &CrowdReportRecord,
    vote_type: Option<VoteType>,
    deps: &ModelDeps,
) -> ModelResult<()> {
    let Some(vote_type) = vote_type.filter(VoteType::is_privileged) else {
        return Ok(());
    };
    let map = match report.map_id.as_deref() {
        Some(map_id) => Map::get(user, map_id, deps).await?,
        None => None,
    };
    match map {
        Some(map) => map.assert_access(user, Role::MapReviewer, deps).await,
        None => Err(ModelError::NotAuthorized {
            uid: user.id.clone(),
            role: Role::MapReviewer,
            target: format!("{vote_type} vote on report {:?}", report.id),
        }),
    }
}
