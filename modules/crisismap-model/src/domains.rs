use crisismap_common::{Role, User};
use crisismap_store::DomainRecord;
use tracing::warn;

use crate::deps::ModelDeps;
use crate::error::{ModelError, ModelResult};
use crate::perms::{self, Target};

/// Per-domain settings for publishing and new-map permissions.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub record: DomainRecord,
}

impl Domain {
    pub async fn get(name: &str, deps: &ModelDeps) -> ModelResult<Option<Self>> {
        Ok(deps
            .store
            .get_domain(name)
            .await?
            .map(|record| Self { record }))
    }

    /// Like [`Domain::get`], but an unknown domain is a validation error.
    pub async fn require(name: &str, deps: &ModelDeps) -> ModelResult<Self> {
        Self::get(name, deps)
            .await?
            .ok_or_else(|| ModelError::validation(format!("No such domain: {name:?}")))
    }

    /// Creates a domain. Site admins only.
    pub async fn create(
        user: &User,
        record: DomainRecord,
        deps: &ModelDeps,
    ) -> ModelResult<Self> {
        perms::assert(user, Role::Admin, Target::Global, deps).await?;
        validate_name(&record.name)?;
        deps.store.put_domain(&record).await?;
        Ok(Self { record })
    }

    /// Saves settings changes. Requires domain admin.
    pub async fn put(&self, user: &User, deps: &ModelDeps) -> ModelResult<()> {
        perms::assert(user, Role::DomainAdmin, Target::Domain(&self.record.name), deps).await?;
        deps.store.put_domain(&self.record).await?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn has_sticky_catalog_entries(&self) -> bool {
        self.record.has_sticky_catalog_entries
    }

    /// The map role granted to the domain's subjects on new maps, if any.
    pub fn initial_domain_role(&self) -> Option<Role> {
        let raw = self.record.initial_domain_role.as_deref()?;
        match raw.parse::<Role>() {
            Ok(role) if role.is_map_role() => Some(role),
            Ok(role) => {
                warn!(domain = %self.record.name, %role, "initial_domain_role is not a map role");
                None
            }
            Err(e) => {
                warn!(domain = %self.record.name, error = %e, "Unparseable initial_domain_role");
                None
            }
        }
    }
}

/// Domain names and catalog labels share this rule: non-empty, no `:`.
pub(crate) fn validate_name(name: &str) -> ModelResult<()> {
    if name.is_empty() || name.contains(crisismap_common::CATALOG_KEY_SEPARATOR) {
        return Err(ModelError::validation(format!("Invalid name: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_may_not_contain_colons() {
        assert!(validate_name("xyz.com").is_ok());
        assert!(validate_name("a:b").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn initial_role_must_be_a_map_role() {
        let mut record = DomainRecord::new("xyz.com");
        record.initial_domain_role = Some("MAP_EDITOR".into());
        assert_eq!(
            Domain { record: record.clone() }.initial_domain_role(),
            Some(Role::MapEditor)
        );

        record.initial_domain_role = Some("CATALOG_EDITOR".into());
        assert_eq!(Domain { record }.initial_domain_role(), None);
    }
}
