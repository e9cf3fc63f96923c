use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::records::*;

/// Persistence for every entity the model layer owns.
///
/// Implemented by `PgStore` (postgres) and `MemoryStore` (tests, local dev).
/// Listings come back newest update first unless noted otherwise.
#[async_trait]
pub trait Datastore: Send + Sync {
    // --- Maps ---

    async fn get_map(&self, id: &str) -> StoreResult<Option<MapRecord>>;

    /// Non-deleted maps, optionally restricted to one domain.
    async fn list_maps(&self, domain: Option<&str>) -> StoreResult<Vec<MapRecord>>;

    /// Writes map metadata only; never touches versions.
    async fn put_map(&self, map: &MapRecord) -> StoreResult<()>;

    /// Atomically appends a version and points the map at it. Creates the
    /// map row if it doesn't exist yet. Returns the map as written.
    async fn put_map_with_new_version(
        &self,
        map: MapRecord,
        maproot_json: String,
        creator_uid: &str,
        created: DateTime<Utc>,
    ) -> StoreResult<(MapRecord, MapVersionRecord)>;

    async fn get_map_version(
        &self,
        map_id: &str,
        version_id: i64,
    ) -> StoreResult<Option<MapVersionRecord>>;

    /// All versions of a map, newest first.
    async fn list_map_versions(&self, map_id: &str) -> StoreResult<Vec<MapVersionRecord>>;

    /// Physically removes a map and all of its versions.
    async fn wipe_map(&self, map_id: &str) -> StoreResult<()>;

    // --- Catalog ---

    async fn get_catalog_entry(
        &self,
        domain: &str,
        label: &str,
    ) -> StoreResult<Option<CatalogEntryRecord>>;

    async fn list_catalog_entries(
        &self,
        filter: &CatalogFilter,
    ) -> StoreResult<Vec<CatalogEntryRecord>>;

    async fn put_catalog_entry(&self, entry: &CatalogEntryRecord) -> StoreResult<()>;

    /// Returns false if there was nothing to delete.
    async fn delete_catalog_entry(&self, domain: &str, label: &str) -> StoreResult<bool>;

    // --- Crowd reports ---

    /// A fresh integer, unique across all calls.
    async fn allocate_report_id(&self) -> StoreResult<i64>;

    async fn get_report(&self, id: &str) -> StoreResult<Option<CrowdReportRecord>>;

    /// Reports in the order of `ids`; unknown IDs are skipped.
    async fn get_reports(&self, ids: &[String]) -> StoreResult<Vec<CrowdReportRecord>>;

    async fn query_reports(&self, query: &ReportQuery) -> StoreResult<Vec<CrowdReportRecord>>;

    /// Every stored report, in no particular order.
    async fn list_all_reports(&self) -> StoreResult<Vec<CrowdReportRecord>>;

    async fn put_report(&self, report: &CrowdReportRecord) -> StoreResult<()>;

    async fn put_reports(&self, reports: &[CrowdReportRecord]) -> StoreResult<()>;

    /// Applies `apply` to one report while holding it exclusively and writes
    /// the result. Returns `None` if the report doesn't exist.
    async fn modify_report(
        &self,
        id: &str,
        apply: ReportMutation,
    ) -> StoreResult<Option<CrowdReportRecord>>;

    // --- Votes ---

    async fn get_vote(&self, report_id: &str, voter: &str) -> StoreResult<Option<CrowdVoteRecord>>;

    async fn get_votes(
        &self,
        report_ids: &[String],
        voter: &str,
    ) -> StoreResult<Vec<CrowdVoteRecord>>;

    /// Rescores the vote's report with `score`, writes it, then stores or
    /// replaces the vote keyed by (report, voter), all while holding the
    /// report exclusively. Returns
    /// `None`, writing nothing, if the report doesn't exist.
    async fn cast_vote(
        &self,
        vote: &CrowdVoteRecord,
        score: ScoreMutation,
    ) -> StoreResult<Option<CrowdReportRecord>>;

    // --- API keys ---

    async fn get_authorization(&self, key: &str) -> StoreResult<Option<AuthorizationRecord>>;

    async fn put_authorization(&self, record: &AuthorizationRecord) -> StoreResult<()>;

    // --- Domains and permission grants ---

    async fn get_domain(&self, name: &str) -> StoreResult<Option<DomainRecord>>;

    async fn put_domain(&self, domain: &DomainRecord) -> StoreResult<()>;

    /// Grants held by any of `subjects`.
    async fn list_grants_for_subjects(
        &self,
        subjects: &[String],
    ) -> StoreResult<Vec<PermissionGrantRecord>>;

    async fn list_grants_for_target(&self, target: &str) -> StoreResult<Vec<PermissionGrantRecord>>;

    async fn put_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()>;

    async fn delete_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()>;

    // --- Redirections ---

    async fn get_redirection(&self, key: &str) -> StoreResult<Option<RedirectionRecord>>;

    async fn put_redirection(&self, redirection: &RedirectionRecord) -> StoreResult<()>;

    // --- Audit log ---

    async fn append_audit_event(&self, event: NewAuditEvent) -> StoreResult<AuditEventRecord>;

    /// Most recent events first.
    async fn list_audit_events(&self, limit: usize) -> StoreResult<Vec<AuditEventRecord>>;
}
