//! Published maps: `<domain>:<label>` entries pointing at one map version.
//!
//! An entry is a snapshot pointer. New map versions don't show up under a
//! label until the entry is repointed with [`CatalogEntry::set_map_version`].
//! Entries are publicly readable, so lookups carry no access check.

use chrono::Utc;
use crisismap_common::{Role, User, ALL_DOMAINS, EMPTY_LABEL, EMPTY_MAP_ID, NEVER};
use crisismap_store::{catalog_key, version_key, CatalogEntryRecord, CatalogFilter};
use serde_json::Value;
use tracing::info;

use crate::audit::{self, AuditEventType};
use crate::deps::ModelDeps;
use crate::domains::{validate_name, Domain};
use crate::error::{ModelError, ModelResult};
use crate::maps::{empty_map_root, Map, EMPTY_MAP_TITLE};
use crate::perms::{self, Access, Target};

const READ_ONLY_ENTRY: &str = "EmptyCatalogEntry";

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub record: CatalogEntryRecord,
    placeholder: bool,
}

impl CatalogEntry {
    /// The read-only entry that label `empty` resolves to in every domain.
    pub fn empty(domain: &str) -> Self {
        Self {
            record: CatalogEntryRecord {
                domain: domain.to_string(),
                label: EMPTY_LABEL.to_string(),
                created: NEVER,
                creator_uid: String::new(),
                updated: NEVER,
                updater_uid: String::new(),
                title: EMPTY_MAP_TITLE.to_string(),
                publisher_name: None,
                map_id: EMPTY_MAP_ID.to_string(),
                map_version_id: 1,
                is_listed: false,
            },
            placeholder: true,
        }
    }

    fn wrap(record: CatalogEntryRecord) -> Self {
        Self {
            record,
            placeholder: false,
        }
    }

    fn wrap_all(records: Vec<CatalogEntryRecord>) -> Vec<Self> {
        records.into_iter().map(Self::wrap).collect()
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn domain(&self) -> &str {
        &self.record.domain
    }

    pub fn label(&self) -> &str {
        &self.record.label
    }

    pub fn map_id(&self) -> &str {
        &self.record.map_id
    }

    pub fn is_listed(&self) -> bool {
        self.record.is_listed
    }

    /// `<domain>:<label>`.
    pub fn key(&self) -> String {
        self.record.key()
    }

    /// `<map_id>@<version_id>` of the published version.
    pub fn map_version_id(&self) -> String {
        self.record.map_version_key()
    }

    fn writable(&self) -> ModelResult<()> {
        if self.placeholder {
            return Err(ModelError::ReadOnly(READ_ONLY_ENTRY));
        }
        Ok(())
    }

    // --- Lookup ---

    pub async fn get(domain: &str, label: &str, deps: &ModelDeps) -> ModelResult<Option<Self>> {
        if label == EMPTY_LABEL {
            return Ok(Some(Self::empty(domain)));
        }
        let record = deps
            .caches
            .catalog_entry
            .get_or(&[domain, label], || async {
                deps.store.get_catalog_entry(domain, label).await
            })
            .await?;
        Ok(record.map(Self::wrap))
    }

    /// All entries, most recently updated first.
    pub async fn get_all(domain: Option<&str>, deps: &ModelDeps) -> ModelResult<Vec<Self>> {
        let records = deps
            .caches
            .catalog
            .get_or(domain.unwrap_or(ALL_DOMAINS), || async {
                deps.store
                    .list_catalog_entries(&CatalogFilter {
                        domain: domain.map(str::to_string),
                        ..Default::default()
                    })
                    .await
            })
            .await?;
        Ok(Self::wrap_all(records))
    }

    /// Entries shown in the domain's map picker, most recently updated first.
    pub async fn get_listed(domain: Option<&str>, deps: &ModelDeps) -> ModelResult<Vec<Self>> {
        let records = deps
            .caches
            .listed_catalog
            .get_or(domain.unwrap_or(ALL_DOMAINS), || async {
                deps.store
                    .list_catalog_entries(&CatalogFilter {
                        domain: domain.map(str::to_string),
                        listed_only: true,
                        ..Default::default()
                    })
                    .await
            })
            .await?;
        Ok(Self::wrap_all(records))
    }

    /// Every entry in any domain that points at `map_id`. Uncached.
    pub async fn get_by_map_id(map_id: &str, deps: &ModelDeps) -> ModelResult<Vec<Self>> {
        let records = deps
            .store
            .list_catalog_entries(&CatalogFilter {
                map_id: Some(map_id.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(Self::wrap_all(records))
    }

    // --- Publishing ---

    /// Publishes the current version of `map` at `domain_name:label`,
    /// overwriting any existing entry the user may change.
    pub async fn create(
        user: &User,
        domain_name: &str,
        label: &str,
        map: &Map,
        is_listed: bool,
        deps: &ModelDeps,
    ) -> ModelResult<Self> {
        validate_name(domain_name)?;
        validate_name(label)?;
        if label == EMPTY_LABEL {
            return Err(ModelError::ReadOnly(READ_ONLY_ENTRY));
        }
        let domain = Domain::require(domain_name, deps).await?;
        let access = Access::load(user, deps).await?;
        access.assert(Role::CatalogEditor, Target::Domain(domain_name))?;
        access.assert(Role::MapViewer, Target::Map(&map.record))?;
        perms::assert_publishable(user, &map.record)?;

        let existing = deps.store.get_catalog_entry(domain_name, label).await?;
        if let Some(existing) = &existing {
            assert_sticky_rule(&access, &domain, existing)?;
        }
        let map_version_id = map
            .record
            .current_version_id
            .ok_or_else(|| ModelError::validation(format!("Map {:?} has no versions", map.id())))?;

        let now = Utc::now();
        let record = match existing {
            Some(mut record) => {
                record.updated = now;
                record.updater_uid = user.id.clone();
                record.title = map.record.title.clone();
                record.map_id = map.record.id.clone();
                record.map_version_id = map_version_id;
                record.is_listed = is_listed;
                record
            }
            None => CatalogEntryRecord {
                domain: domain_name.to_string(),
                label: label.to_string(),
                created: now,
                creator_uid: user.id.clone(),
                updated: now,
                updater_uid: user.id.clone(),
                title: map.record.title.clone(),
                publisher_name: None,
                map_id: map.record.id.clone(),
                map_version_id,
                is_listed,
            },
        };
        deps.store.put_catalog_entry(&record).await?;

        let entry = Self::wrap(record);
        entry.record_event(AuditEventType::MapPublished, user, deps).await?;
        entry.evict(deps);
        Ok(entry)
    }

    /// Saves changes made with the setters. Same rules as [`Self::create`].
    pub async fn put(&mut self, user: &User, deps: &ModelDeps) -> ModelResult<()> {
        self.writable()?;
        let domain = Domain::require(&self.record.domain, deps).await?;
        let access = Access::load(user, deps).await?;
        access.assert(Role::CatalogEditor, Target::Domain(&self.record.domain))?;
        assert_sticky_rule(&access, &domain, &self.record)?;

        self.record.updater_uid = user.id.clone();
        self.record.updated = Utc::now();
        deps.store.put_catalog_entry(&self.record).await?;
        self.record_event(AuditEventType::MapPublished, user, deps).await?;
        self.evict(deps);
        Ok(())
    }

    pub async fn delete(
        user: &User,
        domain_name: &str,
        label: &str,
        deps: &ModelDeps,
    ) -> ModelResult<()> {
        if label == EMPTY_LABEL {
            return Err(ModelError::ReadOnly(READ_ONLY_ENTRY));
        }
        let domain = Domain::require(domain_name, deps).await?;
        let record = deps
            .store
            .get_catalog_entry(domain_name, label)
            .await?
            .ok_or_else(|| {
                ModelError::validation(format!(
                    "No catalog entry {label:?} in domain {domain_name:?}"
                ))
            })?;
        let access = Access::load(user, deps).await?;
        access.assert(Role::CatalogEditor, Target::Domain(domain_name))?;
        assert_sticky_rule(&access, &domain, &record)?;

        deps.store.delete_catalog_entry(domain_name, label).await?;
        let entry = Self::wrap(record);
        entry.record_event(AuditEventType::MapUnpublished, user, deps).await?;
        entry.evict(deps);
        Ok(())
    }

    /// Unpublishes `map_id` from every domain. No access check; callers are
    /// map lifecycle operations that have already checked.
    pub async fn delete_by_map_id(map_id: &str, deps: &ModelDeps) -> ModelResult<()> {
        for entry in Self::get_by_map_id(map_id, deps).await? {
            deps.store
                .delete_catalog_entry(&entry.record.domain, &entry.record.label)
                .await?;
            info!(entry = %entry.key(), map_id, "Catalog entry removed with its map");
            entry.evict(deps);
        }
        Ok(())
    }

    /// Drops the cached entry lists for `domain_name` and for all domains.
    pub fn flush_caches(domain_name: &str, deps: &ModelDeps) {
        let caches = &deps.caches;
        caches.catalog.delete(domain_name);
        caches.listed_catalog.delete(domain_name);
        caches.catalog.delete(ALL_DOMAINS);
        caches.listed_catalog.delete(ALL_DOMAINS);
    }

    fn evict(&self, deps: &ModelDeps) {
        Self::flush_caches(&self.record.domain, deps);
        let key = [self.record.domain.as_str(), self.record.label.as_str()];
        deps.caches.catalog_entry.delete(&key);
        deps.caches.published_map_root.delete(&key);
    }

    async fn record_event(
        &self,
        event_type: AuditEventType,
        user: &User,
        deps: &ModelDeps,
    ) -> ModelResult<()> {
        audit::record(
            audit::event(event_type, user)
                .with_domain(self.record.domain.clone())
                .with_map(self.record.map_id.clone())
                .with_map_version(self.map_version_id())
                .with_catalog_entry(catalog_key(&self.record.domain, &self.record.label)),
            deps,
        )
        .await?;
        Ok(())
    }

    // --- Setters; persisted by `put` ---

    /// Points this entry at the map's current version.
    pub fn set_map_version(&mut self, map: &Map) -> ModelResult<()> {
        self.writable()?;
        let version_id = map
            .record
            .current_version_id
            .ok_or_else(|| ModelError::validation(format!("Map {:?} has no versions", map.id())))?;
        self.record.map_id = map.record.id.clone();
        self.record.map_version_id = version_id;
        self.record.title = map.record.title.clone();
        Ok(())
    }

    pub fn set_publisher_name(&mut self, publisher_name: Option<String>) -> ModelResult<()> {
        self.writable()?;
        self.record.publisher_name = publisher_name;
        Ok(())
    }

    pub fn set_is_listed(&mut self, is_listed: bool) -> ModelResult<()> {
        self.writable()?;
        self.record.is_listed = is_listed;
        Ok(())
    }

    // --- Content ---

    /// The published MapRoot, cached by `[domain, label]`.
    pub async fn map_root(&self, deps: &ModelDeps) -> ModelResult<Value> {
        if self.placeholder || self.record.map_id == EMPTY_MAP_ID {
            return Ok(empty_map_root());
        }
        let key = [self.record.domain.as_str(), self.record.label.as_str()];
        deps.caches
            .published_map_root
            .get_or(&key, || async {
                let version = deps
                    .store
                    .get_map_version(&self.record.map_id, self.record.map_version_id)
                    .await?
                    .ok_or_else(|| {
                        ModelError::NotFound(version_key(
                            &self.record.map_id,
                            self.record.map_version_id,
                        ))
                    })?;
                Ok::<_, ModelError>(serde_json::from_str(&version.maproot_json)?)
            })
            .await
    }
}

/// On a domain with sticky entries, only the entry's creator or a domain
/// admin may overwrite or delete it.
fn assert_sticky_rule(
    access: &Access,
    domain: &Domain,
    entry: &CatalogEntryRecord,
) -> ModelResult<()> {
    if domain.has_sticky_catalog_entries()
        && !access.check(Role::DomainAdmin, Target::Domain(domain.name()))
    {
        perms::assert_catalog_entry_owner(access.user(), entry)?;
    }
    Ok(())
}
