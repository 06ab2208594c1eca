//! Target-store and retrieval-index contracts, with in-memory and PostgreSQL backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcs_core::{EntityKind, KnowledgeDocument, RecipeLineWrite, RecipeView, WritePayload};
use serde::Serialize;
use thiserror::Error;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "rcs-storage";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
    #[error("{kind} with source id {source_id} already exists")]
    Duplicate { kind: EntityKind, source_id: String },
    #[error("operation not supported for {0}")]
    Unsupported(EntityKind),
    #[error("injected write failure for {kind} {source_id}")]
    Injected { kind: EntityKind, source_id: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Relational store owned by this application.
///
/// Every synced row carries a unique per-kind source identifier; that column
/// is the idempotency key for lookups and the marker for purge filters.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn find_by_source_id(&self, kind: EntityKind, source_id: &str) -> StoreResult<Option<String>>;

    /// Insert a new row and return its generated id.
    async fn create(&self, payload: &WritePayload) -> StoreResult<String>;

    /// Update an existing row; absent optional fields leave stored values untouched.
    async fn update(&self, id: &str, payload: &WritePayload) -> StoreResult<()>;

    async fn set_category_parent(&self, category_id: &str, parent_id: &str) -> StoreResult<()>;

    /// Delete every line of the recipe, then insert `lines`.
    async fn replace_recipe_lines(&self, recipe_id: &str, lines: &[RecipeLineWrite]) -> StoreResult<usize>;

    /// Recipes stamped with `origin`, with category, family and ordered lines, sorted by name.
    async fn load_recipes_by_origin(&self, origin: &str) -> StoreResult<Vec<RecipeView>>;

    async fn count(&self, kind: EntityKind) -> StoreResult<u64>;

    /// Rows of `kind` carrying a source identifier.
    async fn count_synced(&self, kind: EntityKind) -> StoreResult<u64>;

    /// Lines pointing at a synced ingredient from a recipe not stamped with `origin`.
    async fn delete_foreign_recipe_lines(&self, origin: &str) -> StoreResult<u64>;

    /// Deletes recipes stamped with `origin`; their lines cascade.
    async fn delete_recipes_by_origin(&self, origin: &str) -> StoreResult<u64>;

    /// Deletes every row of `kind` with a non-null source identifier.
    async fn delete_synced(&self, kind: EntityKind) -> StoreResult<u64>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub documents: u64,
    pub last_published_at: Option<DateTime<Utc>>,
}

/// Publish target for generated knowledge documents.
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    async fn delete_documents_by_source(&self, source: &str) -> StoreResult<u64>;

    /// Insert or replace documents keyed by `(source, title)`.
    async fn bulk_upsert_documents(&self, docs: &[KnowledgeDocument]) -> StoreResult<usize>;

    async fn source_summary(&self, source: &str) -> StoreResult<SourceSummary>;
}
