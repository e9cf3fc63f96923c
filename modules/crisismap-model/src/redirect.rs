use crisismap_common::{Role, User};
use crisismap_store::RedirectionRecord;

use crate::deps::ModelDeps;
use crate::error::ModelResult;
use crate::perms::{self, Target};

/// The target URL stored under `key`.
pub async fn get(key: &str, deps: &ModelDeps) -> ModelResult<Option<String>> {
    Ok(deps.store.get_redirection(key).await?.map(|r| r.url))
}

/// Stores a redirection. Site admins only.
pub async fn put(user: &User, key: &str, url: &str, deps: &ModelDeps) -> ModelResult<()> {
    perms::assert(user, Role::Admin, Target::Global, deps).await?;
    deps.store
        .put_redirection(&RedirectionRecord {
            key: key.to_string(),
            url: url.to_string(),
        })
        .await?;
    Ok(())
}
