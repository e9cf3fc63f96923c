//! Crowd reports: creation, listings, structured search, and vote scoring.
//!
//! A report with a `map_id` is visible only to users who can view that map;
//! every listing drops the reports the acting user can't see, so a listing
//! may return fewer than `count` reports.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use crisismap_common::{GeoPoint, User, VoteCounts, VoteType};
use crisismap_store::search::utc_to_timestamp;
use crisismap_store::{CrowdReportRecord, CrowdVoteRecord, Document, ReportQuery, StoreError};
use serde_json::Value;
use tracing::{debug, info};

use crate::deps::ModelDeps;
use crate::error::{ModelError, ModelResult};
use crate::maps::Map;

/// Input for [`create`]. Absent optional fields take their stored defaults.
#[derive(Debug, Clone)]
pub struct NewCrowdReport {
    /// Must start with `source`; generated when absent.
    pub id: Option<String>,
    pub source: String,
    pub author: String,
    pub effective: DateTime<Utc>,
    pub text: String,
    pub topic_ids: Vec<String>,
    pub answers: Value,
    pub location: Option<GeoPoint>,
    pub submitted: Option<DateTime<Utc>>,
    pub map_id: Option<String>,
    pub place_id: Option<String>,
}

/// Optional constraints shared by the datastore-backed listings.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub author: Option<String>,
    pub hidden: Option<bool>,
    pub reviewed: Option<bool>,
    pub max_updated: Option<DateTime<Utc>>,
    pub offset: usize,
}

/// A new report ID under `source`: `<source>/.reports/<n>`.
pub async fn generate_id(source: &str, deps: &ModelDeps) -> ModelResult<String> {
    let n = deps.store.allocate_report_id().await?;
    Ok(format!("{}/.reports/{n}", source.trim_end_matches('/')))
}

/// Stores a new report and its search document.
pub async fn create(report: NewCrowdReport, deps: &ModelDeps) -> ModelResult<CrowdReportRecord> {
    let id = match report.id {
        Some(id) => id,
        None => generate_id(&report.source, deps).await?,
    };
    if !id.starts_with(&report.source) {
        return Err(ModelError::validation(format!(
            "ID {id:?} not valid for source {}",
            report.source
        )));
    }
    let answers = match report.answers {
        Value::Null => Value::Object(Default::default()),
        Value::Object(fields) => Value::Object(fields),
        _ => return Err(ModelError::validation("answers must be a JSON object")),
    };

    let now = Utc::now();
    let location = GeoPoint::or_nowhere(report.location);
    let record = CrowdReportRecord {
        id,
        source: report.source,
        author: report.author,
        effective: report.effective,
        submitted: report.submitted.unwrap_or(now),
        updated: now,
        text: report.text,
        map_id: report.map_id.filter(|m| !m.is_empty()),
        topic_ids: report.topic_ids,
        answers,
        lat: location.lat,
        lon: location.lon,
        place_id: report.place_id,
        upvote_count: 0,
        downvote_count: 0,
        score: 0.0,
        hidden: false,
        reviewed: false,
    };
    let document = search_document(&record);
    deps.store.put_report(&record).await?;
    deps.index.put(vec![document]).await;
    info!(report_id = %record.id, author = %record.author, "Crowd report created");
    Ok(record)
}

/// The report with `id`, if it exists and the user may see it.
pub async fn get(user: &User, id: &str, deps: &ModelDeps) -> ModelResult<Option<CrowdReportRecord>> {
    let Some(report) = deps.store.get_report(id).await? else {
        return Ok(None);
    };
    if let Some(map_id) = &report.map_id {
        if Map::get(user, map_id, deps).await?.is_none() {
            return Ok(None);
        }
    }
    Ok(Some(report))
}

/// Reports by `author`, most recently updated first.
pub async fn get_for_author(
    user: &User,
    author: &str,
    count: usize,
    filter: &ReportFilter,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    if author.is_empty() {
        return Ok(Vec::new());
    }
    let query = ReportQuery {
        author: Some(author.to_string()),
        ..listing_query(count, filter)
    };
    filter_reports(user, deps.store.query_reports(&query).await?, deps).await
}

/// Reports carrying any of `topic_ids`, most recently updated first.
pub async fn get_for_topics(
    user: &User,
    topic_ids: &[String],
    count: usize,
    filter: &ReportFilter,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    if topic_ids.is_empty() {
        return Ok(Vec::new());
    }
    let query = ReportQuery {
        topic_ids: Some(topic_ids.to_vec()),
        ..listing_query(count, filter)
    };
    filter_reports(user, deps.store.query_reports(&query).await?, deps).await
}

/// Reports without a location, optionally restricted to `topic_ids`.
pub async fn get_without_location(
    user: &User,
    topic_ids: &[String],
    count: usize,
    filter: &ReportFilter,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    let query = ReportQuery {
        topic_ids: (!topic_ids.is_empty()).then(|| topic_ids.to_vec()),
        without_location: true,
        ..listing_query(count, filter)
    };
    filter_reports(user, deps.store.query_reports(&query).await?, deps).await
}

fn listing_query(count: usize, filter: &ReportFilter) -> ReportQuery {
    ReportQuery {
        author: filter.author.clone(),
        max_updated: filter.max_updated,
        hidden: filter.hidden,
        reviewed: filter.reviewed,
        count,
        offset: filter.offset,
        ..Default::default()
    }
}

/// Reports within a per-topic radius (metres) of `center`.
pub async fn get_by_location(
    user: &User,
    center: GeoPoint,
    topic_radii: &[(String, f64)],
    count: usize,
    max_updated: Option<DateTime<Utc>>,
    hidden: Option<bool>,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    if topic_radii.is_empty() {
        return Ok(Vec::new());
    }
    let query = location_query(center, topic_radii, max_updated, hidden);
    search_ids(user, &query, count, deps).await
}

fn location_query(
    center: GeoPoint,
    topic_radii: &[(String, f64)],
    max_updated: Option<DateTime<Utc>>,
    hidden: Option<bool>,
) -> String {
    topic_radii
        .iter()
        .map(|(topic_id, radius)| {
            let mut clauses = vec![
                format!("topic_id = {}", quote(topic_id)),
                format!(
                    "distance(location, geopoint({:.6}, {:.6})) < {radius:.6}",
                    center.lat, center.lon
                ),
            ];
            if let Some(max) = max_updated {
                clauses.push(format!("updated <= {}", utc_to_timestamp(max)));
            }
            if let Some(hidden) = hidden {
                clauses.push(format!("hidden = {}", bool_atom(hidden)));
            }
            format!("({})", clauses.join(" "))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Structured search over indexed fields: `text`, `author`, `updated`,
/// `score`, `topic_id`, `hidden`, `reviewed`, `location`.
pub async fn search(
    user: &User,
    query: &str,
    count: usize,
    max_updated: Option<DateTime<Utc>>,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    let mut query = query.to_string();
    if let Some(max) = max_updated {
        query.push_str(&format!(" (updated <= {})", utc_to_timestamp(max)));
    }
    search_ids(user, &query, count, deps).await
}

async fn search_ids(
    user: &User,
    query: &str,
    count: usize,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    let ids = deps.index.search(query, count).await.map_err(|e| match e {
        StoreError::Query(message) => ModelError::Validation(message),
        other => other.into(),
    })?;
    debug!(query, hits = ids.len(), "Report search");
    let reports = deps.store.get_reports(&ids).await?;
    filter_reports(user, reports, deps).await
}

/// Drops reports on maps the user can't view. Each map is checked once.
pub async fn filter_reports(
    user: &User,
    reports: Vec<CrowdReportRecord>,
    deps: &ModelDeps,
) -> ModelResult<Vec<CrowdReportRecord>> {
    let mut viewable: HashMap<String, bool> = HashMap::new();
    let mut visible = Vec::with_capacity(reports.len());
    for report in reports {
        let Some(map_id) = report.map_id.as_deref() else {
            visible.push(report);
            continue;
        };
        let allowed = match viewable.get(map_id) {
            Some(allowed) => *allowed,
            None => {
                let allowed = match Map::get(user, map_id, deps).await {
                    Ok(map) => map.is_some(),
                    Err(ModelError::NotAuthorized { .. }) => false,
                    Err(e) => return Err(e),
                };
                viewable.insert(map_id.to_string(), allowed);
                allowed
            }
        };
        if allowed {
            visible.push(report);
        }
    }
    Ok(visible)
}

/// Sets the spam-review flag on each report and refreshes its document.
pub async fn mark_as_reviewed(ids: &[String], reviewed: bool, deps: &ModelDeps) -> ModelResult<()> {
    for id in ids {
        let updated = deps
            .store
            .modify_report(id, Box::new(move |report| report.reviewed = reviewed))
            .await?;
        if let Some(report) = updated {
            deps.index.put(vec![search_document(&report)]).await;
        }
    }
    Ok(())
}

/// Stores the voter's vote on a report together with the report's new
/// tallies, as one unit on that report.
///
/// Counts the stored votes of each type, adjusts by the pending change (the
/// voter's old vote going away, `new_vote_type` arriving), writes the
/// tallies and then the vote. The search document is refreshed once the
/// write has landed. Returns `None` if the report doesn't exist.
pub async fn update_score(
    report_id: &str,
    voter: &str,
    new_vote_type: Option<VoteType>,
    deps: &ModelDeps,
) -> ModelResult<Option<CrowdReportRecord>> {
    let vote = CrowdVoteRecord {
        report_id: report_id.to_string(),
        voter: voter.to_string(),
        vote_type: new_vote_type.map(|v| v.as_str().to_string()),
    };
    let updated = deps
        .store
        .cast_vote(
            &vote,
            Box::new(
                move |report: &mut CrowdReportRecord,
                      old_vote: Option<&CrowdVoteRecord>,
                      stored: VoteCounts| {
                    let old_type = old_vote.and_then(|v| v.vote_type.as_deref());
                    let counts = pending_counts(stored, old_type, new_vote_type);
                    report.upvote_count = counts.upvotes();
                    report.downvote_count = counts.downvotes();
                    report.score = counts.score();
                    report.hidden = counts.is_hidden();
                },
            ),
        )
        .await?;
    let Some(report) = updated else {
        return Ok(None);
    };
    deps.index.put(vec![search_document(&report)]).await;
    debug!(report_id, score = report.score, hidden = report.hidden, "Report score updated");
    Ok(Some(report))
}

/// The stored counts with `old_type` taken away and `new_vote_type` added.
pub fn pending_counts(
    stored: VoteCounts,
    old_type: Option<&str>,
    new_vote_type: Option<VoteType>,
) -> VoteCounts {
    let mut counts = stored;
    for vote_type in VoteType::ALL {
        let added = i64::from(new_vote_type == Some(vote_type));
        let removed = i64::from(old_type == Some(vote_type.as_str()));
        *counts.get_mut(vote_type) += added - removed;
    }
    counts
}

/// The search document indexed for a report. `updated` is indexed as epoch
/// seconds so it can be compared numerically.
pub fn search_document(report: &CrowdReportRecord) -> Document {
    let mut document = Document::new(report.id.clone())
        .number("updated", utc_to_timestamp(report.updated))
        .number("score", report.score)
        .text("text", report.text.clone())
        .text("author", report.author.clone())
        .atom("hidden", bool_atom(report.hidden))
        .atom("reviewed", bool_atom(report.reviewed));
    for topic_id in &report.topic_ids {
        document = document.atom("topic_id", topic_id.clone());
    }
    if report.has_location() {
        document = document.geo("location", report.location());
    }
    document
}

/// Re-indexes every stored report, e.g. after a restart with an empty
/// in-process index. Returns the number indexed; zero for an index that
/// reads the stored reports directly.
pub async fn rebuild_index(deps: &ModelDeps) -> ModelResult<usize> {
    if !deps.index.needs_documents() {
        return Ok(0);
    }
    let documents: Vec<Document> = deps
        .store
        .list_all_reports()
        .await?
        .iter()
        .map(search_document)
        .collect();
    let indexed = documents.len();
    deps.index.put(documents).await;
    info!(indexed, "Report search index rebuilt");
    Ok(indexed)
}

fn bool_atom(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisismap_store::search::parse_query;

    #[test]
    fn location_query_has_one_clause_per_topic() {
        let query = location_query(
            GeoPoint::new(37.0, -122.0),
            &[("m.a".to_string(), 100.0), ("m.b".to_string(), 2000.0)],
            None,
            Some(false),
        );
        assert_eq!(
            query,
            "(topic_id = \"m.a\" distance(location, geopoint(37.000000, -122.000000)) < 100.000000 hidden = False) OR \
             (topic_id = \"m.b\" distance(location, geopoint(37.000000, -122.000000)) < 2000.000000 hidden = False)"
        );
        assert!(parse_query(&query).is_ok());
    }

    #[test]
    fn pending_counts_swap_the_old_vote_for_the_new_one() {
        let stored = VoteCounts {
            anonymous_up: 3,
            anonymous_down: 1,
            reviewer_up: 0,
            reviewer_down: 0,
        };
        let counts = pending_counts(stored, Some("ANONYMOUS_UP"), Some(VoteType::ReviewerDown));
        assert_eq!(counts.anonymous_up, 2);
        assert_eq!(counts.reviewer_down, 1);
        assert_eq!(counts.score(), -999.0);

        let retracted = pending_counts(stored, Some("ANONYMOUS_DOWN"), None);
        assert_eq!(retracted.anonymous_down, 0);
        assert_eq!(pending_counts(stored, None, None), stored);
    }

    #[test]
    fn search_document_skips_missing_location() {
        let now = Utc::now();
        let report = CrowdReportRecord {
            id: "http://a/.reports/1".into(),
            source: "http://a".into(),
            author: "http://a/u".into(),
            effective: now,
            submitted: now,
            updated: now,
            text: "Flooded".into(),
            map_id: None,
            topic_ids: vec!["m.t1".into(), "m.t2".into()],
            answers: Value::Object(Default::default()),
            lat: 90.0,
            lon: 90.0,
            place_id: None,
            upvote_count: 0,
            downvote_count: 0,
            score: 0.0,
            hidden: true,
            reviewed: false,
        };
        let document = search_document(&report);

        assert_eq!(document.values("topic_id").count(), 2);
        assert_eq!(document.values("location").count(), 0);
        assert!(parse_query("hidden = True").unwrap().matches(&document));
        assert!(parse_query("text:flooded").unwrap().matches(&document));
    }
}
