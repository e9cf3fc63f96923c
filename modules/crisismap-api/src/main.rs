use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crisismap_api::{build_router, AppState};
use crisismap_common::Config;
use crisismap_model::{perms, reports, ModelDeps};
use crisismap_store::{MemorySearchIndex, MemoryStore, PgSearchIndex, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;

    let deps = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            let index = PgSearchIndex::new(store.pool().clone());
            ModelDeps::new(Arc::new(store), Arc::new(index))
        }
        None => {
            info!("DATABASE_URL not set; using the in-memory store");
            ModelDeps::new(Arc::new(MemoryStore::new()), Arc::new(MemorySearchIndex::new()))
        }
    };

    perms::seed_admins(&config.admin_uids, &deps).await?;
    reports::rebuild_index(&deps).await?;

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let state = Arc::new(AppState::new(deps, config)?);
    let app = build_router(state);

    info!("Crisis map API starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// `RUST_LOG` filtering (default `info`); JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
