//! Phase orchestrator.
//!
//! Phases run strictly in dependency order and records within a phase are
//! written one at a time. A failing record is logged into its phase and
//! skipped; a failing fetch or a store error outside the per-record loop
//! aborts the run, keeping every phase result gathered so far.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rcs_core::{EntityFields, EntityKind, RecipeLineWrite, WritePayload, RECIPE_ORIGIN};
use rcs_source::records::{
    self, SourceCategory, SourceGroup, SourceMeasureUnit, SourceProduct, SourceRecipe,
    SourceSupplier,
};
use rcs_source::{EndpointMap, SourceClient, SourceError};
use rcs_storage::{RetrievalIndex, SourceSummary, StoreError, TargetStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::registry::IdentifierRegistry;
use crate::report::{PhaseResult, SyncReport};
use crate::{allergens, knowledge, mappers};

/// Caller hook invoked with `(phase, detail)`.
pub type ProgressFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub skip_knowledge_base: bool,
    pub on_progress: Option<ProgressFn>,
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("dry_run", &self.dry_run)
            .field("skip_knowledge_base", &self.skip_knowledge_base)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl SyncOptions {
    pub fn with_progress(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    fn progress(&self, phase: &str, detail: &str) {
        debug!(phase, detail, "progress");
        if let Some(hook) = &self.on_progress {
            hook(phase, detail);
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching {endpoint} failed: {err}")]
    Fetch {
        endpoint: String,
        #[source]
        err: SourceError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("a sync run is already in progress")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    MeasureUnits,
    Categories,
    RecipeCategories,
    RecipeFamilies,
    Suppliers,
    Ingredients,
    Recipes,
    KnowledgeBase,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::MeasureUnits,
        Phase::Categories,
        Phase::RecipeCategories,
        Phase::RecipeFamilies,
        Phase::Suppliers,
        Phase::Ingredients,
        Phase::Recipes,
        Phase::KnowledgeBase,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MeasureUnits => "Measure units",
            Self::Categories => "Categories",
            Self::RecipeCategories => "Recipe categories",
            Self::RecipeFamilies => "Recipe families",
            Self::Suppliers => "Suppliers",
            Self::Ingredients => "Ingredients",
            Self::Recipes => "Recipes",
            Self::KnowledgeBase => "Knowledge base",
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            Self::MeasureUnits => EntityKind::MeasureUnit,
            Self::Categories => EntityKind::Category,
            Self::RecipeCategories => EntityKind::RecipeCategory,
            Self::RecipeFamilies => EntityKind::RecipeFamily,
            Self::Suppliers => EntityKind::Supplier,
            Self::Ingredients => EntityKind::Ingredient,
            Self::Recipes => EntityKind::Recipe,
            Self::KnowledgeBase => EntityKind::KnowledgeDocument,
        }
    }

    fn entity_label(self) -> &'static str {
        match self {
            Self::Recipes => "Recipe + RecipeLine",
            other => other.kind().label(),
        }
    }
}

/// Snapshot for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub synced_rows: BTreeMap<EntityKind, u64>,
    pub knowledge: SourceSummary,
    pub last_report: Option<SyncReport>,
}

enum Upserted {
    Created(String),
    Updated(String),
}

impl Upserted {
    fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

struct RunState<'a> {
    options: &'a SyncOptions,
    registry: IdentifierRegistry,
    /// Source product id to product name, for every decoded product.
    ingredient_names: HashMap<String, String>,
    knowledge_documents: usize,
}

impl RunState<'_> {
    fn accept(&mut self, result: &mut PhaseResult, payload: &WritePayload, outcome: &Upserted) {
        match outcome {
            Upserted::Created(_) => result.created += 1,
            Upserted::Updated(_) => result.updated += 1,
        }
        self.registry
            .record(payload.kind(), payload.source_id.clone(), outcome.id());
    }
}

/// Whether following parent links up from `from` arrives at `target`.
fn reaches(links: &HashMap<String, String>, from: &str, target: &str) -> bool {
    let mut current = from;
    for _ in 0..=links.len() {
        if current == target {
            return true;
        }
        match links.get(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}

fn decode_record<T: DeserializeOwned>(value: &JsonValue, result: &mut PhaseResult) -> Option<T> {
    match records::decode(value) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!(error = %err, "record does not match the expected shape");
            result.skipped += 1;
            None
        }
    }
}

fn record_error(payload: &WritePayload, err: &StoreError) -> String {
    format!("{} \"{}\": {err}", payload.kind(), payload.fields.name())
}

pub struct SyncEngine {
    pub(crate) source: Arc<dyn SourceClient>,
    pub(crate) store: Arc<dyn TargetStore>,
    pub(crate) index: Arc<dyn RetrievalIndex>,
    pub(crate) endpoints: EndpointMap,
    pub(crate) run_lock: Mutex<()>,
    last_report: Mutex<Option<SyncReport>>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SourceClient>,
        store: Arc<dyn TargetStore>,
        index: Arc<dyn RetrievalIndex>,
    ) -> Self {
        Self {
            source,
            store,
            index,
            endpoints: EndpointMap::default(),
            run_lock: Mutex::new(()),
            last_report: Mutex::new(None),
        }
    }

    pub fn with_endpoints(mut self, endpoints: EndpointMap) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoints(&self) -> &EndpointMap {
        &self.endpoints
    }

    /// True while a sync or purge holds the run lock.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().await.clone()
    }

    pub async fn status(&self) -> Result<SyncStatus, StoreError> {
        let mut synced_rows = BTreeMap::new();
        for kind in Phase::ALL
            .into_iter()
            .map(Phase::kind)
            .filter(|k| *k != EntityKind::KnowledgeDocument)
            .chain([EntityKind::RecipeLine])
        {
            synced_rows.insert(kind, self.store.count_synced(kind).await?);
        }
        Ok(SyncStatus {
            running: self.is_running(),
            synced_rows,
            knowledge: self.index.source_summary(rcs_core::KNOWLEDGE_SOURCE).await?,
            last_report: self.last_report().await,
        })
    }

    /// Run every phase once. Always returns a report; a concurrent call gets
    /// a report holding a single fatal "already in progress" error.
    pub async fn run_sync(&self, options: SyncOptions) -> SyncReport {
        let run_id = Uuid::new_v4();
        let clock = Instant::now();
        let mut report = SyncReport::new(run_id, Utc::now(), options.dry_run);

        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!(%run_id, "sync requested while another run holds the lock");
            report.push_fatal(SyncError::Busy);
            report.finished_at = Utc::now();
            report.duration_ms = clock.elapsed().as_millis() as u64;
            return report;
        };

        info!(%run_id, dry_run = options.dry_run, "sync run started");
        let mut state = RunState {
            options: &options,
            registry: IdentifierRegistry::new(),
            ingredient_names: HashMap::new(),
            knowledge_documents: 0,
        };
        if let Err(err) = self.run_phases(run_id, &mut state, &mut report).await {
            error!(%run_id, error = %err, "sync run aborted");
            report.push_fatal(&err);
        }

        report.knowledge_base_document_count = state.knowledge_documents;
        report.finished_at = Utc::now();
        report.duration_ms = clock.elapsed().as_millis() as u64;
        let (created, updated, skipped) = report.totals();
        info!(
            %run_id,
            created,
            updated,
            skipped,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "sync run finished"
        );
        *self.last_report.lock().await = Some(report.clone());
        report
    }

    async fn run_phases(
        &self,
        run_id: Uuid,
        state: &mut RunState<'_>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for phase in Phase::ALL {
            if phase == Phase::KnowledgeBase && state.options.skip_knowledge_base {
                break;
            }
            let span = info_span!("sync_phase", phase = phase.name(), %run_id);
            let result = self.run_phase(phase, state).instrument(span).await?;
            state.options.progress(phase.name(), &result.summary());
            report.push_phase(result);
        }
        Ok(())
    }

    async fn run_phase(&self, phase: Phase, state: &mut RunState<'_>) -> Result<PhaseResult, SyncError> {
        let started = Instant::now();
        let endpoint = self.endpoints.get(phase.kind()).to_string();
        let mut result = PhaseResult::new(phase.name(), endpoint.clone(), phase.entity_label());

        if phase == Phase::KnowledgeBase {
            self.sync_knowledge_base(state, &mut result).await?;
        } else {
            state.options.progress(phase.name(), "fetching");
            let page = self
                .source
                .fetch(&endpoint)
                .await
                .map_err(|err| SyncError::Fetch {
                    endpoint: endpoint.clone(),
                    err,
                })?;
            debug!(records = page.data.len(), "source records fetched");
            let records = page.data;
            match phase {
                Phase::MeasureUnits => self.sync_measure_units(state, &mut result, &records).await,
                Phase::Categories => self.sync_categories(state, &mut result, &records).await,
                Phase::RecipeCategories | Phase::RecipeFamilies => {
                    self.sync_groups(phase, state, &mut result, &records).await
                }
                Phase::Suppliers => self.sync_suppliers(state, &mut result, &records).await,
                Phase::Ingredients => self.sync_ingredients(state, &mut result, &records).await,
                Phase::Recipes => self.sync_recipes(state, &mut result, &records).await,
                Phase::KnowledgeBase => {}
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Look up by source id, then update or create. Dry runs only read and
    /// hand back the source id as a placeholder target id.
    async fn upsert(&self, payload: &WritePayload, dry_run: bool) -> Result<Upserted, StoreError> {
        let existing = self
            .store
            .find_by_source_id(payload.kind(), &payload.source_id)
            .await?;
        match (existing, dry_run) {
            (Some(id), false) => {
                self.store.update(&id, payload).await?;
                Ok(Upserted::Updated(id))
            }
            (None, false) => Ok(Upserted::Created(self.store.create(payload).await?)),
            (Some(_), true) => Ok(Upserted::Updated(payload.source_id.clone())),
            (None, true) => Ok(Upserted::Created(payload.source_id.clone())),
        }
    }

    /// Write one mapped record; `None` counts as skipped.
    async fn apply(&self, state: &mut RunState<'_>, result: &mut PhaseResult, payload: Option<WritePayload>) {
        let Some(payload) = payload else {
            result.skipped += 1;
            return;
        };
        match self.upsert(&payload, state.options.dry_run).await {
            Ok(outcome) => state.accept(result, &payload, &outcome),
            Err(err) => {
                warn!(source_id = %payload.source_id, error = %err, "record write failed");
                result.record_error(record_error(&payload, &err));
            }
        }
    }

    async fn sync_measure_units(&self, state: &mut RunState<'_>, result: &mut PhaseResult, records: &[JsonValue]) {
        for value in records {
            if let Some(raw) = decode_record::<SourceMeasureUnit>(value, result) {
                self.apply(state, result, mappers::map_measure_unit(&raw)).await;
            }
        }
    }

    async fn sync_categories(&self, state: &mut RunState<'_>, result: &mut PhaseResult, records: &[JsonValue]) {
        // (child source id, parent source id) pairs whose parent came later
        let mut deferred: Vec<(String, String)> = Vec::new();
        // child source id -> parent source id, for links made this phase
        let mut links: HashMap<String, String> = HashMap::new();
        for value in records {
            let Some(raw) = decode_record::<SourceCategory>(value, result) else {
                continue;
            };
            let resolved_parent = raw
                .parent_id
                .clone()
                .filter(|pid| state.registry.category(pid).is_some());
            let pending_parent = raw
                .parent_id
                .clone()
                .filter(|pid| *pid != raw.id && resolved_parent.is_none());
            let payload = mappers::map_category(&raw, &state.registry);
            let accepted = payload.is_some();
            let before = result.errors.len();
            self.apply(state, result, payload).await;
            if !accepted || result.errors.len() != before {
                continue;
            }
            if let Some(parent) = resolved_parent {
                links.insert(raw.id.clone(), parent);
            } else if let Some(parent) = pending_parent {
                deferred.push((raw.id.clone(), parent));
            }
        }
        if state.options.dry_run {
            return;
        }
        for (child, parent) in deferred {
            let (Some(child_id), Some(parent_id)) =
                (state.registry.category(&child), state.registry.category(&parent))
            else {
                debug!(child = %child, parent = %parent, "category parent was never synchronized");
                continue;
            };
            if reaches(&links, &parent, &child) {
                warn!(child = %child, parent = %parent, "category parent link would close a cycle");
                result
                    .errors
                    .push(format!("Category {child} parent {parent}: would create a cycle"));
                continue;
            }
            let (child_id, parent_id) = (child_id.to_string(), parent_id.to_string());
            match self.store.set_category_parent(&child_id, &parent_id).await {
                Ok(()) => {
                    links.insert(child, parent);
                }
                Err(err) => result
                    .errors
                    .push(format!("Category {child} parent {parent}: {err}")),
            }
        }
    }

    async fn sync_groups(
        &self,
        phase: Phase,
        state: &mut RunState<'_>,
        result: &mut PhaseResult,
        records: &[JsonValue],
    ) {
        for value in records {
            if let Some(raw) = decode_record::<SourceGroup>(value, result) {
                let payload = if phase == Phase::RecipeFamilies {
                    mappers::map_recipe_family(&raw)
                } else {
                    mappers::map_recipe_category(&raw)
                };
                self.apply(state, result, payload).await;
            }
        }
    }

    async fn sync_suppliers(&self, state: &mut RunState<'_>, result: &mut PhaseResult, records: &[JsonValue]) {
        for value in records {
            if let Some(raw) = decode_record::<SourceSupplier>(value, result) {
                self.apply(state, result, mappers::map_supplier(&raw)).await;
            }
        }
    }

    async fn sync_ingredients(&self, state: &mut RunState<'_>, result: &mut PhaseResult, records: &[JsonValue]) {
        for value in records {
            if let Some(raw) = decode_record::<SourceProduct>(value, result) {
                state.ingredient_names.insert(raw.id.clone(), raw.name.clone());
                let payload = mappers::map_ingredient(&raw, &state.registry);
                self.apply(state, result, payload).await;
            }
        }
    }

    async fn sync_recipes(&self, state: &mut RunState<'_>, result: &mut PhaseResult, records: &[JsonValue]) {
        for value in records {
            let Some(raw) = decode_record::<SourceRecipe>(value, result) else {
                continue;
            };
            let Some(mut payload) = mappers::map_recipe(&raw, &state.registry) else {
                result.skipped += 1;
                continue;
            };
            if let EntityFields::Recipe(fields) = &mut payload.fields {
                let names = mappers::recipe_ingredient_names(&raw, &state.ingredient_names);
                let inferred = allergens::infer_for_recipe(&names);
                fields.allergens = allergens::merge(&fields.allergens, &inferred);
            }
            let lines = mappers::map_recipe_lines(&raw, &state.registry);
            match self.upsert_recipe(&payload, &lines, state.options.dry_run).await {
                Ok(outcome) => state.accept(result, &payload, &outcome),
                Err(err) => {
                    warn!(source_id = %payload.source_id, error = %err, "recipe write failed");
                    result.record_error(record_error(&payload, &err));
                }
            }
        }
    }

    async fn upsert_recipe(
        &self,
        payload: &WritePayload,
        lines: &[RecipeLineWrite],
        dry_run: bool,
    ) -> Result<Upserted, StoreError> {
        let outcome = self.upsert(payload, dry_run).await?;
        if !dry_run {
            self.store.replace_recipe_lines(outcome.id(), lines).await?;
        }
        Ok(outcome)
    }

    async fn sync_knowledge_base(&self, state: &mut RunState<'_>, result: &mut PhaseResult) -> Result<(), SyncError> {
        let name = Phase::KnowledgeBase.name();
        state.options.progress(name, "loading synchronized recipes");
        let recipes = self.store.load_recipes_by_origin(RECIPE_ORIGIN).await?;
        let docs = knowledge::generate_documents(&recipes);
        state.knowledge_documents = docs.len();
        state
            .options
            .progress(name, &format!("{} documents generated", docs.len()));

        if state.options.dry_run {
            result.skipped = docs.len() as u64;
        } else {
            result.created = knowledge::publish(self.index.as_ref(), &docs).await? as u64;
        }
        Ok(())
    }
}
