//! `Datastore` backed by Postgres.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crisismap_common::{VoteCounts, VoteType};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool};
use tracing::info;

use crate::error::StoreResult;
use crate::records::*;
use crate::traits::Datastore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Applies the SQL migrations bundled with this crate.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn upsert_map<'e>(executor: impl PgExecutor<'e>, map: &MapRecord) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO maps (id, title, description, created, creator_uid, updated, updater_uid,
                          deleted, deleter_uid, blocked, blocker_uid, owners, editors, reviewers,
                          viewers, domain, domain_role, world_readable, current_version_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            updated = EXCLUDED.updated,
            updater_uid = EXCLUDED.updater_uid,
            deleted = EXCLUDED.deleted,
            deleter_uid = EXCLUDED.deleter_uid,
            blocked = EXCLUDED.blocked,
            blocker_uid = EXCLUDED.blocker_uid,
            owners = EXCLUDED.owners,
            editors = EXCLUDED.editors,
            reviewers = EXCLUDED.reviewers,
            viewers = EXCLUDED.viewers,
            domain = EXCLUDED.domain,
            domain_role = EXCLUDED.domain_role,
            world_readable = EXCLUDED.world_readable,
            current_version_id = EXCLUDED.current_version_id
        "#,
    )
    .bind(&map.id)
    .bind(&map.title)
    .bind(&map.description)
    .bind(map.created)
    .bind(&map.creator_uid)
    .bind(map.updated)
    .bind(&map.updater_uid)
    .bind(map.deleted)
    .bind(&map.deleter_uid)
    .bind(map.blocked)
    .bind(&map.blocker_uid)
    .bind(&map.owners)
    .bind(&map.editors)
    .bind(&map.reviewers)
    .bind(&map.viewers)
    .bind(&map.domain)
    .bind(&map.domain_role)
    .bind(map.world_readable)
    .bind(map.current_version_id)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_report<'e>(
    executor: impl PgExecutor<'e>,
    report: &CrowdReportRecord,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO crowd_reports (id, source, author, effective, submitted, updated, text, map_id,
                                   topic_ids, answers, lat, lon, place_id, upvote_count,
                                   downvote_count, score, hidden, reviewed)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (id) DO UPDATE SET
            source = EXCLUDED.source,
            author = EXCLUDED.author,
            effective = EXCLUDED.effective,
            submitted = EXCLUDED.submitted,
            updated = EXCLUDED.updated,
            text = EXCLUDED.text,
            map_id = EXCLUDED.map_id,
            topic_ids = EXCLUDED.topic_ids,
            answers = EXCLUDED.answers,
            lat = EXCLUDED.lat,
            lon = EXCLUDED.lon,
            place_id = EXCLUDED.place_id,
            upvote_count = EXCLUDED.upvote_count,
            downvote_count = EXCLUDED.downvote_count,
            score = EXCLUDED.score,
            hidden = EXCLUDED.hidden,
            reviewed = EXCLUDED.reviewed
        "#,
    )
    .bind(&report.id)
    .bind(&report.source)
    .bind(&report.author)
    .bind(report.effective)
    .bind(report.submitted)
    .bind(report.updated)
    .bind(&report.text)
    .bind(&report.map_id)
    .bind(&report.topic_ids)
    .bind(&report.answers)
    .bind(report.lat)
    .bind(report.lon)
    .bind(&report.place_id)
    .bind(report.upvote_count)
    .bind(report.downvote_count)
    .bind(report.score)
    .bind(report.hidden)
    .bind(report.reviewed)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_vote<'e>(executor: impl PgExecutor<'e>, vote: &CrowdVoteRecord) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO crowd_votes (report_id, voter, vote_type)
        VALUES ($1, $2, $3)
        ON CONFLICT (report_id, voter) DO UPDATE SET vote_type = EXCLUDED.vote_type
        "#,
    )
    .bind(&vote.report_id)
    .bind(&vote.voter)
    .bind(&vote.vote_type)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Datastore for PgStore {
    async fn get_map(&self, id: &str) -> StoreResult<Option<MapRecord>> {
        sqlx::query_as::<_, MapRecord>("SELECT * FROM maps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn list_maps(&self, domain: Option<&str>) -> StoreResult<Vec<MapRecord>> {
        sqlx::query_as::<_, MapRecord>(
            r#"
            SELECT * FROM maps
            WHERE deleted = to_timestamp(0)
              AND ($1::TEXT IS NULL OR domain = $1)
            ORDER BY updated DESC
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn put_map(&self, map: &MapRecord) -> StoreResult<()> {
        upsert_map(&self.pool, map).await
    }

    async fn put_map_with_new_version(
        &self,
        mut map: MapRecord,
        maproot_json: String,
        creator_uid: &str,
        created: DateTime<Utc>,
    ) -> StoreResult<(MapRecord, MapVersionRecord)> {
        let mut tx = self.pool.begin().await?;

        // The upsert locks the map row, serializing version numbering.
        upsert_map(&mut *tx, &map).await?;
        let (version_id,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version_id), 0) + 1 FROM map_versions WHERE map_id = $1",
        )
        .bind(&map.id)
        .fetch_one(&mut *tx)
        .await?;

        let version = sqlx::query_as::<_, MapVersionRecord>(
            r#"
            INSERT INTO map_versions (map_id, version_id, maproot_json, created, creator_uid)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&map.id)
        .bind(version_id)
        .bind(&maproot_json)
        .bind(created)
        .bind(creator_uid)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE maps SET current_version_id = $2 WHERE id = $1")
            .bind(&map.id)
            .bind(version_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        map.current_version_id = Some(version_id);
        Ok((map, version))
    }

    async fn get_map_version(
        &self,
        map_id: &str,
        version_id: i64,
    ) -> StoreResult<Option<MapVersionRecord>> {
        sqlx::query_as::<_, MapVersionRecord>(
            "SELECT * FROM map_versions WHERE map_id = $1 AND version_id = $2",
        )
        .bind(map_id)
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_map_versions(&self, map_id: &str) -> StoreResult<Vec<MapVersionRecord>> {
        sqlx::query_as::<_, MapVersionRecord>(
            "SELECT * FROM map_versions WHERE map_id = $1 ORDER BY created DESC, version_id DESC",
        )
        .bind(map_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn wipe_map(&self, map_id: &str) -> StoreResult<()> {
        // map_versions rows go with the map via ON DELETE CASCADE.
        sqlx::query("DELETE FROM maps WHERE id = $1")
            .bind(map_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_catalog_entry(
        &self,
        domain: &str,
        label: &str,
    ) -> StoreResult<Option<CatalogEntryRecord>> {
        sqlx::query_as::<_, CatalogEntryRecord>(
            "SELECT * FROM catalog_entries WHERE domain = $1 AND label = $2",
        )
        .bind(domain)
        .bind(label)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_catalog_entries(
        &self,
        filter: &CatalogFilter,
    ) -> StoreResult<Vec<CatalogEntryRecord>> {
        sqlx::query_as::<_, CatalogEntryRecord>(
            r#"
            SELECT * FROM catalog_entries
            WHERE ($1::TEXT IS NULL OR domain = $1)
              AND ($2::TEXT IS NULL OR map_id = $2)
              AND (NOT $3 OR is_listed)
            ORDER BY updated DESC
            "#,
        )
        .bind(&filter.domain)
        .bind(&filter.map_id)
        .bind(filter.listed_only)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn put_catalog_entry(&self, entry: &CatalogEntryRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (domain, label, created, creator_uid, updated, updater_uid,
                                         title, publisher_name, map_id, map_version_id, is_listed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (domain, label) DO UPDATE SET
                updated = EXCLUDED.updated,
                updater_uid = EXCLUDED.updater_uid,
                title = EXCLUDED.title,
                publisher_name = EXCLUDED.publisher_name,
                map_id = EXCLUDED.map_id,
                map_version_id = EXCLUDED.map_version_id,
                is_listed = EXCLUDED.is_listed
            "#,
        )
        .bind(&entry.domain)
        .bind(&entry.label)
        .bind(entry.created)
        .bind(&entry.creator_uid)
        .bind(entry.updated)
        .bind(&entry.updater_uid)
        .bind(&entry.title)
        .bind(&entry.publisher_name)
        .bind(&entry.map_id)
        .bind(entry.map_version_id)
        .bind(entry.is_listed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_catalog_entry(&self, domain: &str, label: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM catalog_entries WHERE domain = $1 AND label = $2")
            .bind(domain)
            .bind(label)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn allocate_report_id(&self) -> StoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as("SELECT nextval('crowd_report_ids')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn get_report(&self, id: &str) -> StoreResult<Option<CrowdReportRecord>> {
        sqlx::query_as::<_, CrowdReportRecord>("SELECT * FROM crowd_reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn get_reports(&self, ids: &[String]) -> StoreResult<Vec<CrowdReportRecord>> {
        let rows = sqlx::query_as::<_, CrowdReportRecord>(
            "SELECT * FROM crowd_reports WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_id: HashMap<String, CrowdReportRecord> =
            rows.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn query_reports(&self, query: &ReportQuery) -> StoreResult<Vec<CrowdReportRecord>> {
        sqlx::query_as::<_, CrowdReportRecord>(
            r#"
            SELECT * FROM crowd_reports
            WHERE ($1::TEXT IS NULL OR author = $1)
              AND ($2::TEXT[] IS NULL OR topic_ids && $2)
              AND (NOT $3 OR (lat = 90 AND lon = 90))
              AND ($4::TIMESTAMPTZ IS NULL OR updated <= $4)
              AND ($5::BOOLEAN IS NULL OR hidden = $5)
              AND ($6::BOOLEAN IS NULL OR reviewed = $6)
            ORDER BY updated DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(&query.author)
        .bind(&query.topic_ids)
        .bind(query.without_location)
        .bind(query.max_updated)
        .bind(query.hidden)
        .bind(query.reviewed)
        .bind(query.count as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_all_reports(&self) -> StoreResult<Vec<CrowdReportRecord>> {
        sqlx::query_as::<_, CrowdReportRecord>("SELECT * FROM crowd_reports")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn put_report(&self, report: &CrowdReportRecord) -> StoreResult<()> {
        upsert_report(&self.pool, report).await
    }

    async fn put_reports(&self, reports: &[CrowdReportRecord]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for report in reports {
            upsert_report(&mut *tx, report).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn modify_report(
        &self,
        id: &str,
        apply: ReportMutation,
    ) -> StoreResult<Option<CrowdReportRecord>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, CrowdReportRecord>(
            "SELECT * FROM crowd_reports WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut report) = row else {
            return Ok(None);
        };
        apply(&mut report);
        upsert_report(&mut *tx, &report).await?;
        tx.commit().await?;
        Ok(Some(report))
    }

    async fn get_vote(&self, report_id: &str, voter: &str) -> StoreResult<Option<CrowdVoteRecord>> {
        sqlx::query_as::<_, CrowdVoteRecord>(
            "SELECT * FROM crowd_votes WHERE report_id = $1 AND voter = $2",
        )
        .bind(report_id)
        .bind(voter)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_votes(
        &self,
        report_ids: &[String],
        voter: &str,
    ) -> StoreResult<Vec<CrowdVoteRecord>> {
        sqlx::query_as::<_, CrowdVoteRecord>(
            "SELECT * FROM crowd_votes WHERE report_id = ANY($1) AND voter = $2",
        )
        .bind(report_ids)
        .bind(voter)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn cast_vote(
        &self,
        vote: &CrowdVoteRecord,
        score: ScoreMutation,
    ) -> StoreResult<Option<CrowdReportRecord>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, CrowdReportRecord>(
            "SELECT * FROM crowd_reports WHERE id = $1 FOR UPDATE",
        )
        .bind(&vote.report_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(mut report) = row else {
            return Ok(None);
        };

        let old_vote = sqlx::query_as::<_, CrowdVoteRecord>(
            "SELECT * FROM crowd_votes WHERE report_id = $1 AND voter = $2",
        )
        .bind(&vote.report_id)
        .bind(&vote.voter)
        .fetch_optional(&mut *tx)
        .await?;
        let stored: Vec<(String, i64)> = sqlx::query_as(
            "SELECT vote_type, COUNT(*) FROM crowd_votes \
             WHERE report_id = $1 AND vote_type IS NOT NULL GROUP BY vote_type",
        )
        .bind(&vote.report_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut counts = VoteCounts::default();
        for (raw, count) in stored {
            if let Ok(vote_type) = raw.parse::<VoteType>() {
                *counts.get_mut(vote_type) = count;
            }
        }

        score(&mut report, old_vote.as_ref(), counts);
        upsert_report(&mut *tx, &report).await?;
        upsert_vote(&mut *tx, vote).await?;
        tx.commit().await?;
        Ok(Some(report))
    }

    async fn get_authorization(&self, key: &str) -> StoreResult<Option<AuthorizationRecord>> {
        sqlx::query_as::<_, AuthorizationRecord>("SELECT * FROM authorizations WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn put_authorization(&self, record: &AuthorizationRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO authorizations (key, is_enabled, contact_name, contact_email,
                                        organization_name, crowd_report_write_permission,
                                        crowd_report_spam_check, map_read_permission, source,
                                        map_ids, author_prefix)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (key) DO UPDATE SET
                is_enabled = EXCLUDED.is_enabled,
                contact_name = EXCLUDED.contact_name,
                contact_email = EXCLUDED.contact_email,
                organization_name = EXCLUDED.organization_name,
                crowd_report_write_permission = EXCLUDED.crowd_report_write_permission,
                crowd_report_spam_check = EXCLUDED.crowd_report_spam_check,
                map_read_permission = EXCLUDED.map_read_permission,
                source = EXCLUDED.source,
                map_ids = EXCLUDED.map_ids,
                author_prefix = EXCLUDED.author_prefix
            "#,
        )
        .bind(&record.key)
        .bind(record.is_enabled)
        .bind(&record.contact_name)
        .bind(&record.contact_email)
        .bind(&record.organization_name)
        .bind(record.crowd_report_write_permission)
        .bind(record.crowd_report_spam_check)
        .bind(record.map_read_permission)
        .bind(&record.source)
        .bind(&record.map_ids)
        .bind(&record.author_prefix)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_domain(&self, name: &str) -> StoreResult<Option<DomainRecord>> {
        sqlx::query_as::<_, DomainRecord>("SELECT * FROM domains WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn put_domain(&self, domain: &DomainRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO domains (name, has_sticky_catalog_entries, initial_domain_role, default_label)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                has_sticky_catalog_entries = EXCLUDED.has_sticky_catalog_entries,
                initial_domain_role = EXCLUDED.initial_domain_role,
                default_label = EXCLUDED.default_label
            "#,
        )
        .bind(&domain.name)
        .bind(domain.has_sticky_catalog_entries)
        .bind(&domain.initial_domain_role)
        .bind(&domain.default_label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_grants_for_subjects(
        &self,
        subjects: &[String],
    ) -> StoreResult<Vec<PermissionGrantRecord>> {
        sqlx::query_as::<_, PermissionGrantRecord>(
            "SELECT * FROM permission_grants WHERE subject = ANY($1)",
        )
        .bind(subjects)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_grants_for_target(&self, target: &str) -> StoreResult<Vec<PermissionGrantRecord>> {
        sqlx::query_as::<_, PermissionGrantRecord>(
            "SELECT * FROM permission_grants WHERE target = $1",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn put_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permission_grants (subject, role, target)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&grant.subject)
        .bind(&grant.role)
        .bind(&grant.target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_grant(&self, grant: &PermissionGrantRecord) -> StoreResult<()> {
        sqlx::query("DELETE FROM permission_grants WHERE subject = $1 AND role = $2 AND target = $3")
            .bind(&grant.subject)
            .bind(&grant.role)
            .bind(&grant.target)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_redirection(&self, key: &str) -> StoreResult<Option<RedirectionRecord>> {
        sqlx::query_as::<_, RedirectionRecord>("SELECT * FROM redirections WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn put_redirection(&self, redirection: &RedirectionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO redirections (key, url) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET url = EXCLUDED.url
            "#,
        )
        .bind(&redirection.key)
        .bind(&redirection.url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_audit_event(&self, event: NewAuditEvent) -> StoreResult<AuditEventRecord> {
        sqlx::query_as::<_, AuditEventRecord>(
            r#"
            INSERT INTO audit_events (event_type, uid, domain_name, map_id, map_version_key,
                                      catalog_entry_key, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.uid)
        .bind(&event.domain_name)
        .bind(&event.map_id)
        .bind(&event.map_version_key)
        .bind(&event.catalog_entry_key)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn list_audit_events(&self, limit: usize) -> StoreResult<Vec<AuditEventRecord>> {
        sqlx::query_as::<_, AuditEventRecord>(
            "SELECT * FROM audit_events ORDER BY seq DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}
