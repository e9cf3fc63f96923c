//! Access-controlled maps and their immutable MapRoot versions.
//!
//! Every public operation asserts the acting user's role first. The map with
//! ID `0` is a built-in, world-readable placeholder that cannot be changed.

use chrono::{DateTime, Utc};
use crisismap_common::{Role, User, EMPTY_MAP_ID, NEVER};
use crisismap_store::{version_key, AuthorizationRecord, MapRecord, MapVersionRecord};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, AuditEventType};
use crate::authorization;
use crate::catalog::CatalogEntry;
use crate::deps::ModelDeps;
use crate::domains::Domain;
use crate::error::{ModelError, ModelResult};
use crate::perms::{self, Access, Target};

pub const EMPTY_MAP_TITLE: &str = "Empty map";
pub const EMPTY_MAP_DESCRIPTION: &str = "This is an empty map for testing.";
const EMPTY_MAP_DOMAIN: &str = "gmail.com";
const READ_ONLY_MAP: &str = "EmptyMap";

/// The MapRoot served for the placeholder map.
pub fn empty_map_root() -> Value {
    json!({ "title": EMPTY_MAP_TITLE, "description": EMPTY_MAP_DESCRIPTION })
}

/// One immutable version of a map's MapRoot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapVersion {
    pub map_id: String,
    pub id: i64,
    pub map_root: Value,
    pub created: DateTime<Utc>,
    pub creator_uid: String,
}

impl MapVersion {
    fn from_record(record: MapVersionRecord) -> ModelResult<Self> {
        let map_root = if record.maproot_json.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&record.maproot_json)?
        };
        Ok(Self {
            map_id: record.map_id,
            id: record.version_id,
            map_root,
            created: record.created,
            creator_uid: record.creator_uid,
        })
    }

    fn empty() -> Self {
        Self {
            map_id: EMPTY_MAP_ID.to_string(),
            id: 1,
            map_root: empty_map_root(),
            created: NEVER,
            creator_uid: String::new(),
        }
    }

    /// `<map_id>@<version_id>`.
    pub fn key(&self) -> String {
        version_key(&self.map_id, self.id)
    }
}

/// Initial permission lists for a new map. `None` means the default:
/// the creator for owners, nobody for the rest.
#[derive(Debug, Clone, Default)]
pub struct MapPermissions {
    pub owners: Option<Vec<String>>,
    pub editors: Option<Vec<String>>,
    pub reviewers: Option<Vec<String>>,
    pub viewers: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub record: MapRecord,
    placeholder: bool,
}

impl Map {
    /// The read-only stand-in returned for map ID `0`.
    pub fn empty() -> Self {
        let mut record = MapRecord::new(EMPTY_MAP_ID, EMPTY_MAP_DOMAIN, "");
        record.title = EMPTY_MAP_TITLE.to_string();
        record.description = EMPTY_MAP_DESCRIPTION.to_string();
        record.created = NEVER;
        record.updated = NEVER;
        record.world_readable = true;
        record.current_version_id = Some(1);
        Self {
            record,
            placeholder: true,
        }
    }

    fn wrap(record: MapRecord) -> Self {
        Self {
            record,
            placeholder: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn is_deleted(&self) -> bool {
        self.record.is_deleted()
    }

    pub fn is_blocked(&self) -> bool {
        self.record.is_blocked()
    }

    /// `<map_id>@<version_id>` of the current version, if one has been set.
    pub fn current_version_key(&self) -> Option<String> {
        self.record
            .current_version_id
            .map(|v| version_key(&self.record.id, v))
    }

    fn writable(&self) -> ModelResult<()> {
        if self.placeholder {
            return Err(ModelError::ReadOnly(READ_ONLY_MAP));
        }
        Ok(())
    }

    // --- Lookup ---

    /// A non-deleted map the user can view, or `None` if there is no such
    /// map. Fails if the map exists but the user may not view it.
    pub async fn get(user: &User, id: &str, deps: &ModelDeps) -> ModelResult<Option<Self>> {
        if id == EMPTY_MAP_ID {
            return Ok(Some(Self::empty()));
        }
        let Some(record) = deps.store.get_map(id).await? else {
            return Ok(None);
        };
        if record.is_deleted() {
            return Ok(None);
        }
        let map = Self::wrap(record);
        map.assert_access(user, Role::MapViewer, deps).await?;
        Ok(Some(map))
    }

    /// A deleted map, for admins restoring it.
    pub async fn get_deleted(user: &User, id: &str, deps: &ModelDeps) -> ModelResult<Option<Self>> {
        perms::assert(user, Role::Admin, Target::Global, deps).await?;
        Ok(deps
            .store
            .get_map(id)
            .await?
            .filter(MapRecord::is_deleted)
            .map(Self::wrap))
    }

    /// A map read by an external client holding an API key. Deleted and
    /// blocked maps are not served.
    pub async fn get_with_api_key(
        auth: &AuthorizationRecord,
        id: &str,
        deps: &ModelDeps,
    ) -> ModelResult<Option<Self>> {
        authorization::check_map_read(auth, id)?;
        Ok(deps
            .store
            .get_map(id)
            .await?
            .filter(|record| !record.is_deleted() && !record.is_blocked())
            .map(Self::wrap))
    }

    /// Every non-deleted map, most recently updated first. Admins only.
    pub async fn get_all(
        user: &User,
        domain: Option<&str>,
        deps: &ModelDeps,
    ) -> ModelResult<Vec<Self>> {
        perms::assert(user, Role::Admin, Target::Global, deps).await?;
        Self::list_unchecked(domain, deps).await
    }

    async fn list_unchecked(domain: Option<&str>, deps: &ModelDeps) -> ModelResult<Vec<Self>> {
        Ok(deps
            .store
            .list_maps(domain)
            .await?
            .into_iter()
            .map(Self::wrap)
            .collect())
    }

    /// The non-deleted maps this user can view.
    pub async fn get_viewable(
        user: &User,
        domain: Option<&str>,
        deps: &ModelDeps,
    ) -> ModelResult<Vec<Self>> {
        let access = Access::load(user, deps).await?;
        Ok(Self::list_unchecked(domain, deps)
            .await?
            .into_iter()
            .filter(|map| access.check(Role::MapViewer, Target::Map(&map.record)))
            .collect())
    }

    // --- Creation and versions ---

    /// Creates a map in `domain_name` with `map_root` as its first version.
    pub async fn create(
        user: &User,
        map_root: &Value,
        domain_name: &str,
        permissions: MapPermissions,
        world_readable: bool,
        deps: &ModelDeps,
    ) -> ModelResult<Self> {
        let domain = Domain::require(domain_name, deps).await?;
        perms::assert(user, Role::MapCreator, Target::Domain(domain.name()), deps).await?;

        let mut owners = permissions.owners.unwrap_or_else(|| vec![user.id.clone()]);
        let mut editors = permissions.editors.unwrap_or_default();
        let mut reviewers = permissions.reviewers.unwrap_or_default();
        let mut viewers = permissions.viewers.unwrap_or_default();

        let initial_role = domain.initial_domain_role();
        if let Some(role) = initial_role {
            let list = match role {
                Role::MapOwner => &mut owners,
                Role::MapEditor => &mut editors,
                Role::MapReviewer => &mut reviewers,
                _ => &mut viewers,
            };
            for subject in perms::subjects_for_target(domain.name(), deps).await? {
                if !list.contains(&subject) {
                    list.push(subject);
                }
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        let mut record = MapRecord::new(id, domain.name(), &user.id);
        record.owners = owners;
        record.editors = editors;
        record.reviewers = reviewers;
        record.viewers = viewers;
        record.domain_role = initial_role.map(|r| r.as_str().to_string());
        record.world_readable = world_readable;

        let mut map = Self::wrap(record);
        map.write_version(user, map_root, deps).await?;
        info!(map_id = %map.record.id, domain = %map.record.domain, uid = %user.id, "Map created");
        Ok(map)
    }

    /// Stores `map_root` as this map's new current version and returns the
    /// new version ID. Requires editor.
    pub async fn put_new_version(
        &mut self,
        user: &User,
        map_root: &Value,
        deps: &ModelDeps,
    ) -> ModelResult<i64> {
        self.writable()?;
        self.assert_access(user, Role::MapEditor, deps).await?;
        self.write_version(user, map_root, deps).await
    }

    async fn write_version(
        &mut self,
        user: &User,
        map_root: &Value,
        deps: &ModelDeps,
    ) -> ModelResult<i64> {
        let Value::Object(fields) = map_root else {
            return Err(ModelError::validation("MapRoot must be a JSON object"));
        };
        let mut fields = fields.clone();
        fields.insert("id".to_string(), Value::String(self.record.id.clone()));
        let text_field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let now = Utc::now();
        let mut record = self.record.clone();
        record.title = text_field("title");
        record.description = text_field("description");
        record.updated = now;
        record.updater_uid = user.id.clone();

        let maproot_json = serde_json::to_string(&Value::Object(fields))?;
        let (record, version) = deps
            .store
            .put_map_with_new_version(record, maproot_json, &user.id, now)
            .await?;
        self.record = record;
        deps.caches.map_root.delete(&self.record.id);
        Ok(version.version_id)
    }

    /// The current version, or `None` if none has been set. Holding a `Map`
    /// already implies viewer access.
    pub async fn current_version(&self, deps: &ModelDeps) -> ModelResult<Option<MapVersion>> {
        if self.placeholder {
            return Ok(Some(MapVersion::empty()));
        }
        let Some(version_id) = self.record.current_version_id else {
            return Ok(None);
        };
        deps.store
            .get_map_version(&self.record.id, version_id)
            .await?
            .map(MapVersion::from_record)
            .transpose()
    }

    /// All versions, newest first. Requires editor.
    pub async fn versions(&self, user: &User, deps: &ModelDeps) -> ModelResult<Vec<MapVersion>> {
        if self.placeholder {
            return Ok(vec![MapVersion::empty()]);
        }
        self.assert_access(user, Role::MapEditor, deps).await?;
        deps.store
            .list_map_versions(&self.record.id)
            .await?
            .into_iter()
            .map(MapVersion::from_record)
            .collect()
    }

    /// One specific version. Requires editor.
    pub async fn version(
        &self,
        user: &User,
        version_id: i64,
        deps: &ModelDeps,
    ) -> ModelResult<Option<MapVersion>> {
        if self.placeholder {
            return Ok((version_id == 1).then(MapVersion::empty));
        }
        self.assert_access(user, Role::MapEditor, deps).await?;
        deps.store
            .get_map_version(&self.record.id, version_id)
            .await?
            .map(MapVersion::from_record)
            .transpose()
    }

    /// The current MapRoot, cached by map ID.
    pub async fn map_root(&self, deps: &ModelDeps) -> ModelResult<Value> {
        if self.placeholder {
            return Ok(empty_map_root());
        }
        deps.caches
            .map_root
            .get_or(&self.record.id, || async {
                Ok::<_, ModelError>(
                    self.current_version(deps)
                        .await?
                        .map(|v| v.map_root)
                        .unwrap_or_else(|| json!({})),
                )
            })
            .await
    }

    // --- Lifecycle ---

    /// Soft-deletes the map and unpublishes it everywhere. Requires owner.
    pub async fn delete(&mut self, user: &User, deps: &ModelDeps) -> ModelResult<()> {
        self.writable()?;
        self.assert_access(user, Role::MapOwner, deps).await?;
        self.record.deleted = Utc::now();
        self.record.deleter_uid = Some(user.id.clone());
        CatalogEntry::delete_by_map_id(&self.record.id, deps).await?;
        deps.store.put_map(&self.record).await?;
        audit::record(
            audit::event(AuditEventType::MapDeleted, user).with_map(self.record.id.clone()),
            deps,
        )
        .await?;
        deps.caches.map_root.delete(&self.record.id);
        Ok(())
    }

    /// Admins only.
    pub async fn undelete(&mut self, user: &User, deps: &ModelDeps) -> ModelResult<()> {
        self.writable()?;
        perms::assert(user, Role::Admin, Target::Global, deps).await?;
        self.record.deleted = NEVER;
        self.record.deleter_uid = None;
        deps.store.put_map(&self.record).await?;
        audit::record(
            audit::event(AuditEventType::MapUndeleted, user).with_map(self.record.id.clone()),
            deps,
        )
        .await?;
        deps.caches.map_root.delete(&self.record.id);
        Ok(())
    }

    /// Blocks or unblocks the map. A blocked map is visible only to its first
    /// owner and cannot be published. Admins only.
    pub async fn set_blocked(&mut self, user: &User, block: bool, deps: &ModelDeps) -> ModelResult<()> {
        self.writable()?;
        perms::assert(user, Role::Admin, Target::Global, deps).await?;
        let event_type = if block {
            self.record.blocked = Utc::now();
            self.record.blocker_uid = Some(user.id.clone());
            CatalogEntry::delete_by_map_id(&self.record.id, deps).await?;
            AuditEventType::MapBlocked
        } else {
            self.record.blocked = NEVER;
            self.record.blocker_uid = None;
            AuditEventType::MapUnblocked
        };
        audit::record(
            audit::event(event_type, user).with_map(self.record.id.clone()),
            deps,
        )
        .await?;
        deps.store.put_map(&self.record).await?;
        deps.caches.map_root.delete(&self.record.id);
        Ok(())
    }

    /// Permanently destroys the map and every version. Admins only.
    pub async fn wipe(self, user: &User, deps: &ModelDeps) -> ModelResult<()> {
        self.writable()?;
        self.assert_access(user, Role::Admin, deps).await?;
        CatalogEntry::delete_by_map_id(&self.record.id, deps).await?;
        deps.store.wipe_map(&self.record.id).await?;
        deps.caches.map_root.delete(&self.record.id);
        audit::record(
            audit::event(AuditEventType::MapWiped, user)
                .with_domain(self.record.domain.clone())
                .with_map(self.record.id.clone()),
            deps,
        )
        .await?;
        Ok(())
    }

    // --- Permissions ---

    pub async fn set_world_readable(
        &mut self,
        user: &User,
        world_readable: bool,
        deps: &ModelDeps,
    ) -> ModelResult<()> {
        self.writable()?;
        self.assert_access(user, Role::MapOwner, deps).await?;
        self.record.world_readable = world_readable;
        deps.store.put_map(&self.record).await?;
        Ok(())
    }

    /// Removes `uid` from the list for `role`. Non-map roles are ignored.
    pub async fn revoke_permission(
        &mut self,
        user: &User,
        role: Role,
        uid: &str,
        deps: &ModelDeps,
    ) -> ModelResult<()> {
        self.writable()?;
        self.assert_access(user, Role::MapOwner, deps).await?;
        if let Some(list) = self.list_for(role) {
            list.retain(|member| member != uid);
        }
        deps.store.put_map(&self.record).await?;
        Ok(())
    }

    /// Gives `uid` exactly `role` on this map, revoking any other map role
    /// it held. Non-map roles are ignored.
    pub async fn change_permission_level(
        &mut self,
        user: &User,
        role: Role,
        uid: &str,
        deps: &ModelDeps,
    ) -> ModelResult<()> {
        self.writable()?;
        self.assert_access(user, Role::MapOwner, deps).await?;
        if !role.is_map_role() {
            return Ok(());
        }
        for other in crisismap_common::MAP_ROLES {
            if let Some(list) = self.list_for(other) {
                if other == role {
                    if !list.iter().any(|member| member == uid) {
                        list.push(uid.to_string());
                    }
                } else {
                    list.retain(|member| member != uid);
                }
            }
        }
        deps.store.put_map(&self.record).await?;
        Ok(())
    }

    fn list_for(&mut self, role: Role) -> Option<&mut Vec<String>> {
        match role {
            Role::MapOwner => Some(&mut self.record.owners),
            Role::MapEditor => Some(&mut self.record.editors),
            Role::MapReviewer => Some(&mut self.record.reviewers),
            Role::MapViewer => Some(&mut self.record.viewers),
            _ => None,
        }
    }

    pub async fn check_access(&self, user: &User, role: Role, deps: &ModelDeps) -> ModelResult<bool> {
        let target = match role {
            Role::Admin => Target::Global,
            _ => Target::Map(&self.record),
        };
        perms::check(user, role, target, deps).await
    }

    pub async fn assert_access(&self, user: &User, role: Role, deps: &ModelDeps) -> ModelResult<()> {
        let target = match role {
            Role::Admin => Target::Global,
            _ => Target::Map(&self.record),
        };
        perms::assert(user, role, target, deps).await
    }

    // --- Bulk administration ---

    /// Soft-deletes every map without owners and describes each one.
    pub async fn delete_all_maps_with_no_owner(
        user: &User,
        deps: &ModelDeps,
    ) -> ModelResult<Vec<String>> {
        let mut descriptions = Vec::new();
        for mut map in Self::get_all(user, None, deps).await? {
            if !map.record.owners.is_empty() {
                continue;
            }
            descriptions.push(format!(
                "Map \"{}\" ({}) created on {} by {}",
                map.record.title, map.record.description, map.record.created, map.record.creator_uid
            ));
            map.delete(user, deps).await?;
        }
        Ok(descriptions)
    }

    /// Strips `users` from every map's permission lists and describes each
    /// removal.
    pub async fn remove_users(
        user: &User,
        users: &[User],
        deps: &ModelDeps,
    ) -> ModelResult<Vec<String>> {
        let mut messages = Vec::new();
        if users.is_empty() {
            return Ok(messages);
        }
        for mut map in Self::get_all(user, None, deps).await? {
            let id = map.record.id.clone();
            let title = map.record.title.clone();
            let mut changed = false;
            for (label, role) in [
                ("Owners", Role::MapOwner),
                ("Editors", Role::MapEditor),
                ("Reviewers", Role::MapReviewer),
                ("Viewers", Role::MapViewer),
            ] {
                let Some(list) = map.list_for(role) else {
                    continue;
                };
                for removed in users {
                    if list.contains(&removed.id) {
                        list.retain(|member| *member != removed.id);
                        messages.push(format!(
                            "Removed user [{}] from map [{id} - {title}] {label}",
                            removed.email
                        ));
                        changed = true;
                    }
                }
            }
            if changed {
                deps.store.put_map(&map.record).await?;
            }
        }
        Ok(messages)
    }
}
