//! Applies pending migrations to `DATABASE_URL` and exits. The SQL is
//! embedded at compile time; run this before starting the API.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crisismap_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&database_url).await?;
    store.migrate().await?;
    Ok(())
}
