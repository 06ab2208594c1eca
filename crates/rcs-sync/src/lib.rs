//! Catalog synchronization engine.
//!
//! Pulls measure units, categories, recipe groupings, suppliers, ingredients
//! and recipes from the source API, upserts them idempotently into the
//! target store in dependency order, infers allergens from ingredient names
//! and republishes the recipe knowledge documents. Also owns purge, runtime
//! configuration and the cron scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use rcs_source::{SourceClient, UnconfiguredSource};
use rcs_storage::PgStore;

pub mod allergens;
mod config;
mod engine;
pub mod knowledge;
pub mod mappers;
mod purge;
mod registry;
mod report;
mod scheduler;

pub use config::SyncConfig;
pub use engine::{Phase, ProgressFn, SyncEngine, SyncError, SyncOptions, SyncStatus};
pub use purge::{PurgeCount, PurgeError, PurgeReport, PURGE_ORDER};
pub use registry::IdentifierRegistry;
pub use report::{PhaseResult, SyncReport, FATAL_ERROR_PREFIX};
pub use scheduler::{build_scheduler, maybe_build_scheduler};

pub const CRATE_NAME: &str = "rcs-sync";

async fn connect_store(config: &SyncConfig) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to the target database")?;
    store.migrate().await.context("applying migrations")?;
    Ok(Arc::new(store))
}

/// Engine wired from the environment: migrated PostgreSQL store and index,
/// the configured source client and endpoint overrides. Fails before touching
/// the database when the source client cannot be built.
pub async fn engine_from_config(config: &SyncConfig) -> Result<SyncEngine> {
    let source = config.source_client()?;
    let endpoints = config.endpoints()?;
    let store = connect_store(config).await?;
    Ok(SyncEngine::new(source, store.clone(), store).with_endpoints(endpoints))
}

/// Engine for purge and status, which never fetch. A missing source
/// configuration only surfaces if a sync is attempted.
pub async fn maintenance_engine_from_config(config: &SyncConfig) -> Result<SyncEngine> {
    let source: Arc<dyn SourceClient> = match config.source_client() {
        Ok(source) => source,
        Err(err) => Arc::new(UnconfiguredSource::new(format!("{err:#}"))),
    };
    let store = connect_store(config).await?;
    Ok(SyncEngine::new(source, store.clone(), store))
}
