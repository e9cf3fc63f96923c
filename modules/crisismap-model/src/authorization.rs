//! API keys and the capabilities they grant to external clients.

use crisismap_common::Role;
use crisismap_store::AuthorizationRecord;
use tracing::info;
use uuid::Uuid;

use crate::deps::ModelDeps;
use crate::error::{ModelError, ModelResult};

/// Fields for a new API key. `crowd_report_spam_check` defaults to on.
#[derive(Debug, Clone)]
pub struct NewAuthorization {
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

impl Default for NewAuthorization {
    fn default() -> Self {
        Self {
            contact_name: String::new(),
            contact_email: String::new(),
            organization_name: String::new(),
            crowd_report_write_permission: false,
            crowd_report_spam_check: true,
            map_read_permission: false,
            source: String::new(),
            map_ids: Vec::new(),
            author_prefix: String::new(),
        }
    }
}

/// Cached lookup by key.
pub async fn get(key: &str, deps: &ModelDeps) -> ModelResult<Option<AuthorizationRecord>> {
    Ok(deps
        .caches
        .authorization
        .get_or(key, || async { deps.store.get_authorization(key).await })
        .await?)
}

/// Issues a new, enabled API key.
pub async fn create(new: NewAuthorization, deps: &ModelDeps) -> ModelResult<AuthorizationRecord> {
    if new.crowd_report_write_permission && (new.source.is_empty() || new.map_ids.is_empty()) {
        return Err(ModelError::validation(
            "crowd report write permission requires a source and map IDs",
        ));
    }
    if new.map_read_permission && new.map_ids.is_empty() {
        return Err(ModelError::validation("map read permission requires map IDs"));
    }
    let record = AuthorizationRecord {
        key: Uuid::new_v4().simple().to_string(),
        is_enabled: true,
        contact_name: new.contact_name,
        contact_email: new.contact_email,
        organization_name: new.organization_name,
        crowd_report_write_permission: new.crowd_report_write_permission,
        crowd_report_spam_check: new.crowd_report_spam_check,
        map_read_permission: new.map_read_permission,
        source: new.source,
        map_ids: new.map_ids,
        author_prefix: new.author_prefix,
    };
    deps.store.put_authorization(&record).await?;
    info!(organization = %record.organization_name, "API key issued");
    Ok(record)
}

pub async fn set_enabled(key: &str, enabled: bool, deps: &ModelDeps) -> ModelResult<()> {
    let mut record = deps
        .store
        .get_authorization(key)
        .await?
        .ok_or_else(|| ModelError::validation("No such Authorization."))?;
    record.is_enabled = enabled;
    deps.store.put_authorization(&record).await?;
    deps.caches.authorization.delete(key);
    Ok(())
}

/// Whether the key may post `report`: write permission, matching source,
/// an allowed map, and the author prefix if one is set.
pub fn check_crowd_report_write(
    auth: &AuthorizationRecord,
    report_source: &str,
    report_map_id: Option<&str>,
    report_author: &str,
) -> ModelResult<()> {
    let allowed = auth.is_enabled
        && auth.crowd_report_write_permission
        && report_source == auth.source
        && report_map_id.is_some_and(|id| auth.map_ids.iter().any(|m| m == id))
        && report_author.starts_with(&auth.author_prefix);
    if allowed {
        Ok(())
    } else {
        Err(denied(auth, "crowd report write"))
    }
}

pub fn check_map_read(auth: &AuthorizationRecord, map_id: &str) -> ModelResult<()> {
    if auth.is_enabled && auth.map_read_permission && auth.map_ids.iter().any(|m| m == map_id) {
        Ok(())
    } else {
        Err(denied(auth, &format!("read of map {map_id:?}")))
    }
}

fn denied(auth: &AuthorizationRecord, action: &str) -> ModelError {
    ModelError::NotAuthorized {
        uid: format!("api key {}", auth.organization_name),
        role: Role::MapViewer,
        target: action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> AuthorizationRecord {
        AuthorizationRecord {
            key: "k".into(),
            is_enabled: true,
            contact_name: String::new(),
            contact_email: String::new(),
            organization_name: "Relief Org".into(),
            crowd_report_write_permission: true,
            crowd_report_spam_check: true,
            map_read_permission: true,
            source: "http://relief.example".into(),
            map_ids: vec!["m1".into()],
            author_prefix: "http://relief.example/users/".into(),
        }
    }

    #[test]
    fn write_requires_every_scope() {
        let auth = writer();
        let author = "http://relief.example/users/7";
        assert!(check_crowd_report_write(&auth, "http://relief.example", Some("m1"), author).is_ok());
        assert!(check_crowd_report_write(&auth, "http://other.example", Some("m1"), author).is_err());
        assert!(check_crowd_report_write(&auth, "http://relief.example", Some("m2"), author).is_err());
        assert!(check_crowd_report_write(&auth, "http://relief.example", None, author).is_err());
        assert!(
            check_crowd_report_write(&auth, "http://relief.example", Some("m1"), "http://x/7").is_err()
        );
    }

    #[test]
    fn disabled_keys_grant_nothing() {
        let mut auth = writer();
        auth.is_enabled = false;
        assert!(check_map_read(&auth, "m1").is_err());
        auth.is_enabled = true;
        assert!(check_map_read(&auth, "m1").is_ok());
        assert!(check_map_read(&auth, "m2").is_err());
    }

    #[test]
    fn spam_check_defaults_on() {
        assert!(NewAuthorization::default().crowd_report_spam_check);
    }
}
