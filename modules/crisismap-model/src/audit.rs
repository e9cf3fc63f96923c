use std::fmt;

use crisismap_common::User;
use crisismap_store::{AuditEventRecord, NewAuditEvent};
use tracing::info;

use crate::deps::ModelDeps;
use crate::error::ModelResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    MapDeleted,
    MapUndeleted,
    MapBlocked,
    MapUnblocked,
    MapWiped,
    MapPublished,
    MapUnpublished,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::MapDeleted => "MAP_DELETED",
            AuditEventType::MapUndeleted => "MAP_UNDELETED",
            AuditEventType::MapBlocked => "MAP_BLOCKED",
            AuditEventType::MapUnblocked => "MAP_UNBLOCKED",
            AuditEventType::MapWiped => "MAP_WIPED",
            AuditEventType::MapPublished => "MAP_PUBLISHED",
            AuditEventType::MapUnpublished => "MAP_UNPUBLISHED",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starts an event of `event_type` performed by `user`.
pub fn event(event_type: AuditEventType, user: &User) -> NewAuditEvent {
    let event = NewAuditEvent::new(event_type.as_str());
    if user.is_anonymous() {
        event
    } else {
        event.with_uid(user.id.clone())
    }
}

/// Appends an event to the audit log and echoes it to the tracing log.
pub async fn record(event: NewAuditEvent, deps: &ModelDeps) -> ModelResult<AuditEventRecord> {
    info!(
        event_type = %event.event_type,
        uid = event.uid.as_deref().unwrap_or(""),
        domain = event.domain_name.as_deref().unwrap_or(""),
        map_id = event.map_id.as_deref().unwrap_or(""),
        map_version = event.map_version_key.as_deref().unwrap_or(""),
        catalog_entry = event.catalog_entry_key.as_deref().unwrap_or(""),
        "Audit event"
    );
    Ok(deps.store.append_audit_event(event).await?)
}
