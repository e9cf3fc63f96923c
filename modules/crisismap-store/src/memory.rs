//! In-process `Datastore` for tests and local development (no DATABASE_URL).

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crisismap_common::{VoteCounts, VoteType};

use crate::error::StoreResult;
use crate::records::*;
use crate::traits::Datastore;

#[derive(Default)]
struct Tables {
    maps: HashMap<String, MapRecord>,
    versions: HashMap<String, Vec<MapVersionRecord>>,
    catalog: BTreeMap<String, CatalogEntryRecord>,
    reports: HashMap<String, CrowdReportRecord>,
    votes: HashMap<String, CrowdVoteRecord>,
    authorizations: HashMap<String, AuthorizationRecord>,
    domains: HashMap<String, DomainRecord>,
    grants: Vec<PermissionGrantRecord>,
    redirections: HashMap<String, RedirectionRecord>,
    audit: Vec<AuditEventRecord>,
    next_report_id: i64,
}

/// All tables live behind a single lock, so every call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn newest_first<T>(items: &mut [T], updated: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by(|a, b| updated(b).cmp(&updated(a)));
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get_map(&self, id: &str) -> StoreResult<Option<MapRecord>> {
        Ok(self.read().maps.get(id).cloned())
    }

    async fn list_maps(&self, domain: Option<&str>) -> StoreResult<Vec<MapRecord>> {
        let mut maps: Vec<MapRecord> = self
            .read()
            .maps
            .values()
            .filter(|m| !m.is_deleted())
            .filter(|m| domain.map_or(true, |d| m.domain == d))
            .cloned()
            .collect();
        newest_first(&mut maps, |m| m.updated);
        Ok(maps)
    }

    async fn put_map(&self, map: &MapRecord) -> StoreResult<()> {
        self.write().maps.insert(map.id.clone(), map.clone());
        Ok(())
    }

    async fn put_map_with_new_version(
        &self,
        mut map: MapRecord,
        maproot_json: String,
        creator_uid: &str,
        created: DateTime<Utc>,
    ) -> StoreResult<(MapRecord, MapVersionRecord)> {
        let mut tables = self.write();
        let versions = tables.versions.entry(map.id.clone()).or_default();
        let version_id = versions.iter().map(|v| v.version_id).max().unwrap_or(0) + 1;
        let version = MapVersionRecord {
            map_id: map.id.clone(),
            version_id,
            maproot_json,
            created,
            creator_uid: creator_uid.to_string(),
        };
        versions.push(version.clone());
        map.current_version_id = Some(version_id);
        tables.maps.insert(map.id.clone(), map.clone());
        Ok((map, version))
    }

    async fn get_map_version(
        &self,
        map_id: &str,
        version_id: i64,
    ) -> StoreResult<Option<MapVersionRecord>> {
        Ok(self
            .read()
            .versions
            .get(map_id)
            .and_then(|vs| vs.iter().find(|v| v.version_id == version_id))
            .cloned())
    }

    async fn list_map_versions(&self, map_id: &str) -> StoreResult<Vec<MapVersionRecord>> {
        let mut versions = self.read().versions.get(map_id).cloned().unwrap_or_default();
        versions.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.version_id.cmp(&a.version_id))
        });
        Ok(versions)
    }

    async fn wipe_map(&self, map_id: &str) -> StoreResult<()> {
        let mut tables = self.write();
        tables.maps.remove(map_id);
        tables.versions.remove(map_id);
        Ok(())
    }

    async fn get_catalog_entry(
        &self,
        domain: &str,
        label: &str,
    ) -> StoreResult<Option<CatalogEntryRecord>> {
        Ok(self.read().catalog.get(&catalog_key(domain, label)).cloned())
    }

    async fn list_catalog_entries(
        &self,
        filter: &CatalogFilter,
    ) -> StoreResult<Vec<CatalogEntryRecord>> {
        let mut entries: Vec<CatalogEntryRecord> = self
            .read()
            .catalog
            .values()
            .filter(|e| filter.domain.as_ref().map_or(true, |d| &e.domain == d))
            .filter(|e| filter.map_id.as_ref().map_or(true, |m| &e.map_id == m))
            .filter(|e| !filter.listed_only || e.is_listed)
            .cloned()
            .collect();
        newest_first(&mut entries, |e| e.updated);
        Ok(entries)
    }

    async fn put_catalog_entry(&self, entry: &CatalogEntryRecord) -> StoreResult<()> {
        self.write().catalog.insert(entry.key(), entry.clone());
        Ok(())
    }

    async fn delete_catalog_entry(&self, domain: &str, label: &str) -> StoreResult<bool> {
        Ok(self
            .write()
            .catalog
            .remove(&catalog_key(domain, label))
            .is_some())
    }

    async fn allocate_report_id(&self) -> StoreResult<i64> {
        let mut tables = self.write();
        tables.next_report_id += 1;
        Ok(tables.next_report_id)
    }

    async fn get_report(&self, id: &str) -> StoreResult<Option<CrowdReportRecord>> {
        Ok(self.read().reports.get(id).cloned())
    }

    async fn get_reports(&self, ids: &[String]) -> StoreResult<Vec<CrowdReportRecord>> {
        let tables = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.reports.get(id).cloned())
            .collect())
    }

    async fn query_reports(&self, query: &ReportQuery) -> StoreResult<Vec<CrowdReportRecord>> {
        let mut reports: Vec<CrowdReportRecord> = self
            .read()
            .reports
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        newest_first(&mut reports, |r| r.updated);
        Ok(reports
            .into_iter()
            .skip(query.offset)
            .take(query.count)
            .collect())
    }

    async fn list_all_reports(&self) -> StoreResult<Vec<CrowdReportRecord>> {
        Ok(self.read().reports.values().cloned().collect())
    }

    async fn put_report(&self, report: &CrowdReportRecord) -> StoreResult<()> {
        self.write()
            .reports
            .insert(report.id.clone(), report.clone());
        Ok(())
    }

    async fn put_reports(&self, reports: &[CrowdReportRecord]) -> StoreResult<()> {
        let mut tables = self.write();
        for report in reports {
            tables.reports.insert(report.id.clone(), report.clone());
        }
        Ok(())
    }

    async fn modify_report(
        &self,
        id: &str,
        apply: ReportMutation,
    ) -> StoreResult<Option<CrowdReportRecord>> {
        let mut tables = self.write();
        let Some(report) = tables.reports.get_mut(id) else {
            return Ok(None);
        };
        apply(report);
        Ok(Some(report.clone()))
    }

    async fn get_vote(&self, report_id: &str, voter: &str) -> StoreResult<Option<CrowdVoteRecord>> {
        Ok(self.read().votes.get(&vote_key(report_id, voter)).cloned())
    }

    async fn get_votes(
        &self,
        report_ids: &[String],
        voter: &str,
    ) -> StoreResult<Vec<CrowdVoteRecord>> {
        let tables = self.read();
        Ok(report_ids
            .iter()
            .filter_map(|id| tables.votes.get(&vote_key(id, voter)).cloned())
            .collect())
    }

    async fn cast_vote(
        &self,
        vote: &CrowdVoteRecord,
        score: ScoreMutation,
    ) -> StoreResult<Option<CrowdReportRecord>> {
        let mut guard = self.write();
        let tables = &mut *guard;
        let Some(report) = tables.reports.get_mut(&vote.report_id) else {
            return Ok(None);
        };
        let old_vote = tables.votes.get(&vote.key()).cloned();
        let mut counts = VoteCounts::default();
        let stored_types = tables
            .votes
            .values()
            .filter(|v| v.report_id == vote.report_id)
            .filter_map(|v| v.vote_type.as_deref()?.parse::<VoteType>().ok());
        for vote_type in stored_types {
            *counts.get_mut(vote_type) += 1;
        }
        score(report, old_vote.as_ref(), counts);
        let report = report.clone();
        tables.votes.insert(vote.key(), vote.clone());
        Ok(Some(report))
    }

    async fn get_authorization(&self, key: &str) -> StoreResult<Option<AuthorizationRecord>> {
        Ok(self.read().authorizations.get(key).cloned())
    }

    async fn put_authorization(&self, record: &AuthorizationRecord) -> StoreResult<()> {
        self.write()
            .authorizations
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn get_domain(&self, name: &str) -> StoreResult<Option<DomainRecord>> {
        Ok(self.read().domains.get(name).cloned())
    }

    async fn put_domain(&self, domain: &DomainRecord) -> StoreResult<()> {
        self.write()
            .domains
            .insert(domain.name.clone(), domain.clone());
        Ok(())
    }

    async fn list_grants_for_subjects(
        &self,
        subjects: &[String],
    ) -> StoreResult<Vec<PermissionGrantRecord>> {
        Ok(self
            .read()
            .grants
            .iter()
            .filter(|g| subjects.contains(&g.subject))
            .cloned()
            .collect())
    }

    async fn list_grants_for_target(&self, target: &str) -> StoreResult<Vec<PermissionGrantRecord>> {
        Ok(self
            .read()
            .grants
            .iter()
            .filter(|g| g.target == target)
            .cloned()
            .collect())
    }

    async fn put_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()> {
        let mut tables = self.write();
        if !tables.grants.contains(grant) {
            tables.grants.push(grant.clone());
        }
        Ok(())
    }

    async fn delete_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()> {
        self.write().grants.retain(|g| g != grant);
        Ok(())
    }

    async fn get_redirection(&self, key: &str) -> StoreResult<Option<RedirectionRecord>> {
        Ok(self.read().redirections.get(key).cloned())
    }

    async fn put_redirection(&self, redirection: &RedirectionRecord) -> StoreResult<()> {
        self.write()
            .redirections
            .insert(redirection.key.clone(), redirection.clone());
        Ok(())
    }

    async fn append_audit_event(&self, event: NewAuditEvent) -> StoreResult<AuditEventRecord> {
        let mut tables = self.write();
        let stored = AuditEventRecord {
            seq: tables.audit.len() as i64 + 1,
            ts: Utc::now(),
            event_type: event.event_type,
            uid: event.uid,
            domain_name: event.domain_name,
            map_id: event.map_id,
            map_version_key: event.map_version_key,
            catalog_entry_key: event.catalog_entry_key,
            payload: event.payload,
        };
        tables.audit.push(stored.clone());
        Ok(stored)
    }

    async fn list_audit_events(&self, limit: usize) -> StoreResult<Vec<AuditEventRecord>> {
        Ok(self.read().audit.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crisismap_common::NEVER;

    #[tokio::test]
    async fn versions_are_numbered_per_map() {
        let store = MemoryStore::new();
        let map = MapRecord::new("m1", "xyz.com", "u1");
        let (map, v1) = store
            .put_map_with_new_version(map, "{}".into(), "u1", Utc::now())
            .await
            .unwrap();
        let (map, v2) = store
            .put_map_with_new_version(map, "{}".into(), "u1", Utc::now())
            .await
            .unwrap();

        assert_eq!(v1.version_id, 1);
        assert_eq!(v2.version_id, 2);
        assert_eq!(map.current_version_id, Some(2));

        let versions = store.list_map_versions("m1").await.unwrap();
        assert_eq!(versions[0].version_id, 2);
        assert_eq!(versions[1].version_id, 1);
    }

    #[tokio::test]
    async fn wipe_removes_map_and_versions() {
        let store = MemoryStore::new();
        let map = MapRecord::new("m1", "xyz.com", "u1");
        store
            .put_map_with_new_version(map, "{}".into(), "u1", Utc::now())
            .await
            .unwrap();

        store.wipe_map("m1").await.unwrap();

        assert!(store.get_map("m1").await.unwrap().is_none());
        assert!(store.list_map_versions("m1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_maps_skips_deleted() {
        let store = MemoryStore::new();
        let mut gone = MapRecord::new("gone", "xyz.com", "u1");
        gone.deleted = Utc::now();
        store.put_map(&gone).await.unwrap();
        store.put_map(&MapRecord::new("kept", "xyz.com", "u1")).await.unwrap();

        let maps = store.list_maps(Some("xyz.com")).await.unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].id, "kept");
        assert_eq!(maps[0].deleted, NEVER);
    }

    fn report(id: &str) -> CrowdReportRecord {
        let now = Utc::now();
        CrowdReportRecord {
            id: id.into(),
            source: "http://src".into(),
            author: "http://src/u".into(),
            effective: now,
            submitted: now,
            updated: now,
            text: String::new(),
            map_id: None,
            topic_ids: Vec::new(),
            answers: serde_json::json!({}),
            lat: 90.0,
            lon: 90.0,
            place_id: None,
            upvote_count: 0,
            downvote_count: 0,
            score: 0.0,
            hidden: false,
            reviewed: false,
        }
    }

    /// Records what the store hands to the score mutation.
    fn tally_into_score() -> ScoreMutation {
        Box::new(
            |report: &mut CrowdReportRecord, old: Option<&CrowdVoteRecord>, stored: VoteCounts| {
                report.upvote_count = stored.upvotes();
                report.downvote_count = stored.downvotes();
                report.reviewed = old.is_some();
            },
        )
    }

    #[tokio::test]
    async fn cast_vote_replaces_by_report_and_voter() {
        let store = MemoryStore::new();
        store.put_report(&report("r1")).await.unwrap();
        let vote = |t: &str| CrowdVoteRecord {
            report_id: "r1".into(),
            voter: "v1".into(),
            vote_type: Some(t.into()),
        };

        let first = store
            .cast_vote(&vote("ANONYMOUS_UP"), tally_into_score())
            .await
            .unwrap()
            .unwrap();
        assert!(!first.reviewed);
        assert_eq!(first.upvote_count, 0);

        let second = store
            .cast_vote(&vote("ANONYMOUS_DOWN"), tally_into_score())
            .await
            .unwrap()
            .unwrap();
        assert!(second.reviewed);
        assert_eq!(second.upvote_count, 1);

        let stored = store.get_vote("r1", "v1").await.unwrap().unwrap();
        assert_eq!(stored.vote_type.as_deref(), Some("ANONYMOUS_DOWN"));
        assert_eq!(store.get_report("r1").await.unwrap().unwrap().upvote_count, 1);
    }

    #[tokio::test]
    async fn cast_vote_on_missing_report_writes_nothing() {
        let store = MemoryStore::new();
        let vote = CrowdVoteRecord {
            report_id: "missing".into(),
            voter: "v1".into(),
            vote_type: Some("ANONYMOUS_UP".into()),
        };
        assert!(store.cast_vote(&vote, tally_into_score()).await.unwrap().is_none());
        assert!(store.get_vote("missing", "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allocated_report_ids_are_unique() {
        let store = MemoryStore::new();
        let a = store.allocate_report_id().await.unwrap();
        let b = store.allocate_report_id().await.unwrap();
        assert_ne!(a, b);
    }
}
