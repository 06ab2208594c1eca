use rcs_core::{EntityKind, KNOWLEDGE_SOURCE, RECIPE_ORIGIN};
use rcs_storage::StoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::SyncEngine;

/// Deletion order: anything that references a kind is removed before it.
pub const PURGE_ORDER: [EntityKind; 9] = [
    EntityKind::KnowledgeDocument,
    EntityKind::RecipeLine,
    EntityKind::Recipe,
    EntityKind::Ingredient,
    EntityKind::Category,
    EntityKind::RecipeCategory,
    EntityKind::RecipeFamily,
    EntityKind::Supplier,
    EntityKind::MeasureUnit,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeCount {
    pub entity: EntityKind,
    pub deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub steps: Vec<PurgeCount>,
}

impl PurgeReport {
    pub fn count(&self, entity: EntityKind) -> u64 {
        self.steps
            .iter()
            .find(|s| s.entity == entity)
            .map_or(0, |s| s.deleted)
    }

    pub fn total(&self) -> u64 {
        self.steps.iter().map(|s| s.deleted).sum()
    }
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("a sync run is in progress; purge refused")]
    Busy,
    #[error("purging {step} failed after {} rows: {err}", .partial.total())]
    Step {
        step: EntityKind,
        #[source]
        err: StoreError,
        /// Steps that completed before the failure.
        partial: PurgeReport,
    },
}

impl SyncEngine {
    /// Delete every synchronized row and the published knowledge documents.
    ///
    /// Manually created rows survive, except recipe lines of native recipes
    /// that point at a synced ingredient: those would otherwise block the
    /// ingredient delete.
    pub async fn purge(&self) -> Result<PurgeReport, PurgeError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("purge requested while a sync run holds the lock");
            return Err(PurgeError::Busy);
        };

        let mut report = PurgeReport::default();
        for step in PURGE_ORDER {
            let deleted = match step {
                EntityKind::KnowledgeDocument => {
                    self.index.delete_documents_by_source(KNOWLEDGE_SOURCE).await
                }
                EntityKind::RecipeLine => self.store.delete_foreign_recipe_lines(RECIPE_ORIGIN).await,
                EntityKind::Recipe => self.store.delete_recipes_by_origin(RECIPE_ORIGIN).await,
                kind => self.store.delete_synced(kind).await,
            };
            match deleted {
                Ok(deleted) => {
                    info!(entity = %step, deleted, "purged");
                    report.steps.push(PurgeCount { entity: step, deleted });
                }
                Err(err) => {
                    return Err(PurgeError::Step {
                        step,
                        err,
                        partial: report,
                    })
                }
            }
        }
        info!(total = report.total(), "purge finished");
        Ok(report)
    }
}
