//! Row types shared by every `Datastore` backend.
//!
//! Enumerated values (roles, vote types) are stored as their string names;
//! the model layer parses them into `crisismap_common` enums.

use chrono::{DateTime, Utc};
use crisismap_common::{GeoPoint, VoteCounts, CATALOG_KEY_SEPARATOR, EMPTY_LABEL, NEVER};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MapRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub creator_uid: String,
    pub updated: DateTime<Utc>,
    pub updater_uid: String,
    pub deleted: DateTime<Utc>,
    pub deleter_uid: Option<String>,
    pub blocked: DateTime<Utc>,
    pub blocker_uid: Option<String>,
    pub owners: Vec<String>,
    pub editors: Vec<String>,
    pub reviewers: Vec<String>,
    pub viewers: Vec<String>,
    pub domain: String,
    pub domain_role: Option<String>,
    pub world_readable: bool,
    pub current_version_id: Option<i64>,
}

impl MapRecord {
    /// A fresh, never-saved map with no versions.
    pub fn new(id: impl Into<String>, domain: impl Into<String>, creator_uid: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            created: now,
            creator_uid: creator_uid.to_string(),
            updated: now,
            updater_uid: creator_uid.to_string(),
            deleted: NEVER,
            deleter_uid: None,
            blocked: NEVER,
            blocker_uid: None,
            owners: Vec::new(),
            editors: Vec::new(),
            reviewers: Vec::new(),
            viewers: Vec::new(),
            domain: domain.into(),
            domain_role: None,
            world_readable: false,
            current_version_id: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted != NEVER
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked != NEVER
    }
}

/// An immutable snapshot of a map's MapRoot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MapVersionRecord {
    pub map_id: String,
    pub version_id: i64,
    pub maproot_json: String,
    pub created: DateTime<Utc>,
    pub creator_uid: String,
}

impl MapVersionRecord {
    /// Rendered as `<map_id>@<version_id>`.
    pub fn key(&self) -> String {
        version_key(&self.map_id, self.version_id)
    }
}

pub fn version_key(map_id: &str, version_id: i64) -> String {
    format!("{map_id}@{version_id}")
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogEntryRecord {
    pub domain: String,
    pub label: String,
    pub created: DateTime<Utc>,
    pub creator_uid: String,
    pub updated: DateTime<Utc>,
    pub updater_uid: String,
    pub title: String,
    pub publisher_name: Option<String>,
    pub map_id: String,
    pub map_version_id: i64,
    pub is_listed: bool,
}

impl CatalogEntryRecord {
    pub fn key(&self) -> String {
        catalog_key(&self.domain, &self.label)
    }

    pub fn map_version_key(&self) -> String {
        version_key(&self.map_id, self.map_version_id)
    }
}

pub fn catalog_key(domain: &str, label: &str) -> String {
    format!("{domain}{CATALOG_KEY_SEPARATOR}{label}")
}

#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub domain: Option<String>,
    pub map_id: Option<String>,
    pub listed_only: bool,
}

// ---------------------------------------------------------------------------
// Crowd reports and votes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CrowdReportRecord {
    pub id: String,
    pub source: String,
    pub author: String,
    pub effective: DateTime<Utc>,
    pub submitted: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub text: String,
    pub map_id: Option<String>,
    pub topic_ids: Vec<String>,
    pub answers: serde_json::Value,
    pub lat: f64,
    pub lon: f64,
    pub place_id: Option<String>,
    pub upvote_count: i64,
    pub downvote_count: i64,
    pub score: f64,
    pub hidden: bool,
    pub reviewed: bool,
}

impl CrowdReportRecord {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    pub fn has_location(&self) -> bool {
        !self.location().is_nowhere()
    }
}

/// Filters for the ordered report listings. All set filters must match;
/// `topic_ids` matches reports carrying any of the given topics.
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    pub author: Option<String>,
    pub topic_ids: Option<Vec<String>>,
    pub without_location: bool,
    pub max_updated: Option<DateTime<Utc>>,
    pub hidden: Option<bool>,
    pub reviewed: Option<bool>,
    pub count: usize,
    pub offset: usize,
}

impl ReportQuery {
    pub fn matches(&self, report: &CrowdReportRecord) -> bool {
        if let Some(author) = &self.author {
            if &report.author != author {
                return false;
            }
        }
        if let Some(topics) = &self.topic_ids {
            if !report.topic_ids.iter().any(|t| topics.contains(t)) {
                return false;
            }
        }
        if self.without_location && report.has_location() {
            return false;
        }
        if let Some(max) = self.max_updated {
            if report.updated > max {
                return false;
            }
        }
        if let Some(hidden) = self.hidden {
            if report.hidden != hidden {
                return false;
            }
        }
        if let Some(reviewed) = self.reviewed {
            if report.reviewed != reviewed {
                return false;
            }
        }
        true
    }
}

/// A change applied to one report while the backend holds it exclusively.
pub type ReportMutation = Box<dyn FnOnce(&mut CrowdReportRecord) + Send>;

/// Rescores a report for a pending vote. Receives the voter's stored vote and
/// the report's stored per-type counts, both read before the pending vote is
/// written.
pub type ScoreMutation =
    Box<dyn FnOnce(&mut CrowdReportRecord, Option<&CrowdVoteRecord>, VoteCounts) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CrowdVoteRecord {
    pub report_id: String,
    pub voter: String,
    pub vote_type: Option<String>,
}

impl CrowdVoteRecord {
    pub fn key(&self) -> String {
        vote_key(&self.report_id, &self.voter)
    }
}

pub fn vote_key(report_id: &str, voter: &str) -> String {
    format!("{report_id}\0{voter}")
}

// ---------------------------------------------------------------------------
// API keys, domains, grants, redirects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorizationRecord {
    pub key: String,
    pub is_enabled: bool,
    pub contact_name: String,
    pub contact_email: String,
    pub organization_name: String,
    pub crowd_report_write_permission: bool,
    pub crowd_report_spam_check: bool,
    pub map_read_permission: bool,
    pub source: String,
    pub map_ids: Vec<String>,
    pub author_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DomainRecord {
    pub name: String,
    pub has_sticky_catalog_entries: bool,
    pub initial_domain_role: Option<String>,
    pub default_label: String,
}

impl DomainRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_sticky_catalog_entries: false,
            initial_domain_role: None,
            default_label: EMPTY_LABEL.to_string(),
        }
    }
}

/// One role held by a subject on a target. The subject is a user ID, an
/// e-mail domain, or `*`; the target is a domain name, or empty for global
/// roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct PermissionGrantRecord {
    pub subject: String,
    pub role: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RedirectionRecord {
    pub key: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEventRecord {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub uid: Option<String>,
    pub domain_name: Option<String>,
    pub map_id: Option<String>,
    pub map_version_key: Option<String>,
    pub catalog_entry_key: Option<String>,
    pub payload: serde_json::Value,
}

/// An audit event to be appended. The store assigns seq/ts.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub uid: Option<String>,
    pub domain_name: Option<String>,
    pub map_id: Option<String>,
    pub map_version_key: Option<String>,
    pub catalog_entry_key: Option<String>,
    pub payload: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            uid: None,
            domain_name: None,
            map_id: None,
            map_version_key: None,
            catalog_entry_key: None,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_domain(mut self, domain_name: impl Into<String>) -> Self {
        self.domain_name = Some(domain_name.into());
        self
    }

    pub fn with_map(mut self, map_id: impl Into<String>) -> Self {
        self.map_id = Some(map_id.into());
        self
    }

    pub fn with_map_version(mut self, key: impl Into<String>) -> Self {
        self.map_version_key = Some(key.into());
        self
    }

    pub fn with_catalog_entry(mut self, key: impl Into<String>) -> Self {
        self.catalog_entry_key = Some(key.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisismap_common::NOWHERE;

    fn report(author: &str, topics: &[&str]) -> CrowdReportRecord {
        let now = Utc::now();
        CrowdReportRecord {
            id: "http://src/.reports/1".into(),
            source: "http://src".into(),
            author: author.into(),
            effective: now,
            submitted: now,
            updated: now,
            text: String::new(),
            map_id: None,
            topic_ids: topics.iter().map(|t| t.to_string()).collect(),
            answers: serde_json::json!({}),
            lat: NOWHERE.lat,
            lon: NOWHERE.lon,
            place_id: None,
            upvote_count: 0,
            downvote_count: 0,
            score: 0.0,
            hidden: false,
            reviewed: false,
        }
    }

    #[test]
    fn keys_use_their_separators() {
        assert_eq!(catalog_key("xyz.com", "label"), "xyz.com:label");
        assert_eq!(version_key("abc", 3), "abc@3");
        assert_eq!(vote_key("r", "v"), "r\0v");
    }

    #[test]
    fn report_query_topics_match_any() {
        let query = ReportQuery {
            topic_ids: Some(vec!["m.a".into(), "m.b".into()]),
            ..Default::default()
        };
        assert!(query.matches(&report("x", &["m.b", "m.c"])));
        assert!(!query.matches(&report("x", &["m.c"])));
    }

    #[test]
    fn report_query_without_location_excludes_located_reports() {
        let query = ReportQuery {
            without_location: true,
            ..Default::default()
        };
        let mut located = report("x", &[]);
        located.lat = 10.0;
        assert!(!query.matches(&located));
        assert!(query.matches(&report("x", &[])));
    }
}
