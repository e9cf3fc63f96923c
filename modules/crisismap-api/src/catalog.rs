//! The per-domain list of published maps, with a form that controls which
//! entries appear in the map picker.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{Html, Redirect},
    Form,
};
use tracing::info;

use crisismap_model::CatalogEntry;

use crate::auth::CurrentUser;
use crate::components::{render_catalog, CatalogEntryView};
use crate::error::ApiResult;
use crate::AppState;

pub async fn catalog_page(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(domain): Path<String>,
) -> ApiResult<Html<String>> {
    let entries = CatalogEntry::get_all(Some(&domain), &state.deps).await?;
    let views = entries.iter().map(entry_view).collect();
    Ok(Html(render_catalog(domain, user.email_domain(), views)))
}

/// Only checked boxes are submitted, so a label missing from the form means
/// "unlisted". Entries whose flag is unchanged are not written.
pub async fn catalog_update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(domain): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> ApiResult<Redirect> {
    let entries = CatalogEntry::get_all(Some(&domain), &state.deps).await?;
    for mut entry in entries {
        let listed = form.contains_key(entry.label());
        if entry.is_listed() == listed {
            continue;
        }
        entry.set_is_listed(listed)?;
        entry.put(&user, &state.deps).await?;
        info!(domain = %domain, label = entry.label(), listed, "Catalog listing changed");
    }
    Ok(Redirect::to(&format!("/crisismap/a/{domain}")))
}

fn entry_view(entry: &CatalogEntry) -> CatalogEntryView {
    let record = &entry.record;
    CatalogEntryView {
        label: record.label.clone(),
        title: record.title.clone(),
        map_id: record.map_id.clone(),
        map_version_id: record.map_version_id,
        publisher_name: record.publisher_name.clone().unwrap_or_default(),
        updated: record.updated.format("%Y-%m-%d %H:%M UTC").to_string(),
        is_listed: record.is_listed,
    }
}
