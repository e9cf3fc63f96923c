//! Role checks for users against the whole site, domains, and maps.
//!
//! Domain and global roles come from stored permission grants; map roles
//! come from the map's own permission lists.

use std::collections::BTreeSet;

use crisismap_common::{Role, User, ALL_DOMAINS};
use crisismap_store::{CatalogEntryRecord, MapRecord, PermissionGrantRecord};
use tracing::warn;

use crate::deps::ModelDeps;
use crate::error::{ModelError, ModelResult};

/// Grants with this target apply site-wide.
pub const GLOBAL_TARGET: &str = "";

#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Global,
    Domain(&'a str),
    Map(&'a MapRecord),
}

impl Target<'_> {
    fn describe(&self) -> String {
        match self {
            Target::Global => "the site".to_string(),
            Target::Domain(name) => format!("domain {name:?}"),
            Target::Map(map) => format!("map {:?}", map.id),
        }
    }
}

/// The identities a user acts as: their ID, their e-mail domain, and `*`.
pub fn subjects_for_user(user: &User) -> Vec<String> {
    let mut subjects = Vec::with_capacity(3);
    if !user.is_anonymous() {
        subjects.push(user.id.clone());
    }
    if let Some(domain) = user.email_domain() {
        subjects.push(domain);
    }
    subjects.push(ALL_DOMAINS.to_string());
    subjects
}

/// A user's grants, loaded once and reused across many checks.
#[derive(Debug, Clone)]
pub struct Access {
    user: User,
    subjects: Vec<String>,
    grants: Vec<(Role, String)>,
}

impl Access {
    pub async fn load(user: &User, deps: &ModelDeps) -> ModelResult<Self> {
        let subjects = subjects_for_user(user);
        let rows = deps.store.list_grants_for_subjects(&subjects).await?;
        let grants = rows
            .into_iter()
            .filter_map(|grant| match grant.role.parse::<Role>() {
                Ok(role) => Some((role, grant.target)),
                Err(e) => {
                    warn!(subject = %grant.subject, error = %e, "Ignoring grant with unknown role");
                    None
                }
            })
            .collect();
        Ok(Self {
            user: user.clone(),
            subjects,
            grants,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn is_admin(&self) -> bool {
        self.grants
            .iter()
            .any(|(role, target)| *role == Role::Admin && target == GLOBAL_TARGET)
    }

    fn has_domain_role(&self, role: Role, domain: &str) -> bool {
        self.grants
            .iter()
            .any(|(held, target)| target == domain && held.implies(role))
    }

    /// The strongest map role this user holds on `map`, if any.
    pub fn map_role(&self, map: &MapRecord) -> Option<Role> {
        if self.is_admin() {
            return Some(Role::MapOwner);
        }
        if map.is_blocked() {
            // A blocked map stays visible only to its first owner.
            return match map.owners.first() {
                Some(first) if !self.user.is_anonymous() && *first == self.user.id => {
                    Some(Role::MapOwner)
                }
                _ => None,
            };
        }

        let listed = |list: &[String]| list.iter().any(|s| self.subjects.contains(s));
        let mut held: Vec<Role> = Vec::new();
        if listed(&map.owners) {
            held.push(Role::MapOwner);
        }
        if listed(&map.editors) {
            held.push(Role::MapEditor);
        }
        if listed(&map.reviewers) {
            held.push(Role::MapReviewer);
        }
        if listed(&map.viewers) {
            held.push(Role::MapViewer);
        }
        if self.user.email_domain().as_deref() == Some(map.domain.as_str()) {
            if let Some(role) = map.domain_role.as_deref().and_then(|r| r.parse().ok()) {
                held.push(role);
            }
        }
        if map.world_readable {
            held.push(Role::MapViewer);
        }
        held.into_iter()
            .reduce(|best, role| if best.implies(role) { best } else { role })
    }

    pub fn check(&self, role: Role, target: Target<'_>) -> bool {
        if self.is_admin() {
            return true;
        }
        match (role, target) {
            (Role::Admin, _) => false,
            (role, Target::Domain(domain)) if role.is_domain_role() => {
                self.has_domain_role(role, domain)
            }
            (role, Target::Map(map)) if role.is_map_role() => {
                self.map_role(map).is_some_and(|held| held.implies(role))
            }
            _ => false,
        }
    }

    pub fn assert(&self, role: Role, target: Target<'_>) -> ModelResult<()> {
        if self.check(role, target) {
            Ok(())
        } else {
            Err(ModelError::NotAuthorized {
                uid: self.user.id.clone(),
                role,
                target: target.describe(),
            })
        }
    }
}

pub async fn check(
    user: &User,
    role: Role,
    target: Target<'_>,
    deps: &ModelDeps,
) -> ModelResult<bool> {
    Ok(Access::load(user, deps).await?.check(role, target))
}

pub async fn assert(
    user: &User,
    role: Role,
    target: Target<'_>,
    deps: &ModelDeps,
) -> ModelResult<()> {
    Access::load(user, deps).await?.assert(role, target)
}

/// Blocked maps may not be published.
pub fn assert_publishable(user: &User, map: &MapRecord) -> ModelResult<()> {
    if map.is_blocked() {
        return Err(ModelError::NotAuthorized {
            uid: user.id.clone(),
            role: Role::CatalogEditor,
            target: format!("blocked map {:?}", map.id),
        });
    }
    Ok(())
}

/// Only the user who first created a catalog entry may change it.
pub fn assert_catalog_entry_owner(user: &User, entry: &CatalogEntryRecord) -> ModelResult<()> {
    if user.is_anonymous() || user.id != entry.creator_uid {
        return Err(ModelError::NotAuthorized {
            uid: user.id.clone(),
            role: Role::CatalogEditor,
            target: format!("catalog entry {:?}", entry.key()),
        });
    }
    Ok(())
}

/// All subjects holding any role on `target`.
pub async fn subjects_for_target(target: &str, deps: &ModelDeps) -> ModelResult<BTreeSet<String>> {
    Ok(deps
        .store
        .list_grants_for_target(target)
        .await?
        .into_iter()
        .map(|grant| grant.subject)
        .collect())
}

/// Grants `role` on `target` to `subject`. Requires admin, or domain admin
/// for domain roles on that domain.
pub async fn grant(
    user: &User,
    subject: &str,
    role: Role,
    target: &str,
    deps: &ModelDeps,
) -> ModelResult<()> {
    assert_may_grant(user, role, target, deps).await?;
    deps.store
        .put_grant(&PermissionGrantRecord {
            subject: subject.to_string(),
            role: role.as_str().to_string(),
            target: target.to_string(),
        })
        .await?;
    Ok(())
}

pub async fn revoke(
    user: &User,
    subject: &str,
    role: Role,
    target: &str,
    deps: &ModelDeps,
) -> ModelResult<()> {
    assert_may_grant(user, role, target, deps).await?;
    deps.store
        .delete_grant(&PermissionGrantRecord {
            subject: subject.to_string(),
            role: role.as_str().to_string(),
            target: target.to_string(),
        })
        .await?;
    Ok(())
}

async fn assert_may_grant(
    user: &User,
    role: Role,
    target: &str,
    deps: &ModelDeps,
) -> ModelResult<()> {
    let access = Access::load(user, deps).await?;
    if role.is_domain_role() && target != GLOBAL_TARGET {
        access.assert(Role::DomainAdmin, Target::Domain(target))
    } else {
        access.assert(Role::Admin, Target::Global)
    }
}

/// Seeds site-wide admins without an acting user (start-up configuration).
pub async fn seed_admins(uids: &[String], deps: &ModelDeps) -> ModelResult<()> {
    for uid in uids {
        deps.store
            .put_grant(&PermissionGrantRecord {
                subject: uid.clone(),
                role: Role::Admin.as_str().to_string(),
                target: GLOBAL_TARGET.to_string(),
            })
            .await?;
    }
    Ok(())
}
