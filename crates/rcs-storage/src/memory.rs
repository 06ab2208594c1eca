//! In-process store with the same referential rules as the SQL schema.
//!
//! Required references are `RESTRICT`, optional ones (`category.parent_id`,
//! `ingredient.supplier_id`, `recipe.family_id`) are `SET NULL`, and recipe
//! lines cascade with their recipe. Used by tests, dry demos and the fixture
//! workflow.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcs_core::{
    EntityFields, EntityKind, KnowledgeDocument, RecipeLineView, RecipeLineWrite, RecipeView,
    WritePayload,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{RetrievalIndex, SourceSummary, StoreError, StoreResult, TargetStore};

#[derive(Debug, Clone)]
struct Row {
    source_id: Option<String>,
    fields: EntityFields,
}

#[derive(Debug, Clone)]
struct LineRow {
    recipe_id: String,
    line: RecipeLineWrite,
}

#[derive(Debug, Clone)]
struct DocumentRow {
    doc: KnowledgeDocument,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<EntityKind, BTreeMap<String, Row>>,
    lines: BTreeMap<String, LineRow>,
    documents: Vec<DocumentRow>,
    failing: HashSet<(EntityKind, String)>,
}

impl Tables {
    fn rows_of(&self, kind: EntityKind) -> impl Iterator<Item = (&String, &Row)> {
        self.rows.get(&kind).into_iter().flat_map(|t| t.iter())
    }

    fn rows_of_mut(&mut self, kind: EntityKind) -> impl Iterator<Item = &mut Row> {
        self.rows.entry(kind).or_default().values_mut()
    }

    fn get(&self, kind: EntityKind, id: &str) -> Option<&Row> {
        self.rows.get(&kind).and_then(|t| t.get(id))
    }

    fn exists(&self, kind: EntityKind, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    fn require(&self, kind: EntityKind, id: &str, from: EntityKind) -> StoreResult<()> {
        if self.exists(kind, id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKey(format!(
                "{from} references missing {kind} {id}"
            )))
        }
    }

    fn check_references(&self, fields: &EntityFields) -> StoreResult<()> {
        let from = fields.kind();
        match fields {
            EntityFields::Category(f) => {
                if let Some(parent) = &f.parent_id {
                    self.require(EntityKind::Category, parent, from)?;
                }
            }
            EntityFields::Ingredient(f) => {
                self.require(EntityKind::Category, &f.category_id, from)?;
                self.require(EntityKind::MeasureUnit, &f.unit_id, from)?;
                if let Some(supplier) = &f.supplier_id {
                    self.require(EntityKind::Supplier, supplier, from)?;
                }
            }
            EntityFields::Recipe(f) => {
                self.require(EntityKind::RecipeCategory, &f.category_id, from)?;
                if let Some(family) = &f.family_id {
                    self.require(EntityKind::RecipeFamily, family, from)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_line(&self, line: &RecipeLineWrite) -> StoreResult<()> {
        self.require(EntityKind::Ingredient, &line.ingredient_id, EntityKind::RecipeLine)?;
        self.require(EntityKind::MeasureUnit, &line.unit_id, EntityKind::RecipeLine)
    }

    fn check_injected(&self, payload: &WritePayload) -> StoreResult<()> {
        let key = (payload.kind(), payload.source_id.clone());
        if self.failing.contains(&key) {
            return Err(StoreError::Injected {
                kind: key.0,
                source_id: key.1,
            });
        }
        Ok(())
    }

    fn insert(&mut self, source_id: Option<String>, fields: EntityFields) -> StoreResult<String> {
        let kind = fields.kind();
        if let Some(sid) = &source_id {
            if self
                .rows_of(kind)
                .any(|(_, r)| r.source_id.as_deref() == Some(sid.as_str()))
            {
                return Err(StoreError::Duplicate {
                    kind,
                    source_id: sid.clone(),
                });
            }
        }
        self.check_references(&fields)?;
        let id = Uuid::new_v4().to_string();
        self.rows
            .entry(kind)
            .or_default()
            .insert(id.clone(), Row { source_id, fields });
        Ok(id)
    }

    fn insert_line(&mut self, recipe_id: &str, line: RecipeLineWrite) -> String {
        let id = Uuid::new_v4().to_string();
        self.lines.insert(
            id.clone(),
            LineRow {
                recipe_id: recipe_id.to_string(),
                line,
            },
        );
        id
    }

    /// Single-statement delete: either every row goes or nothing changes.
    fn delete_rows(&mut self, kind: EntityKind, ids: &HashSet<String>) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let hit = |id: &String| ids.contains(id);

        let restricted = match kind {
            EntityKind::Category => self.rows_of(EntityKind::Ingredient).any(
                |(_, r)| matches!(&r.fields, EntityFields::Ingredient(f) if hit(&f.category_id)),
            ),
            EntityKind::MeasureUnit => {
                self.rows_of(EntityKind::Ingredient).any(
                    |(_, r)| matches!(&r.fields, EntityFields::Ingredient(f) if hit(&f.unit_id)),
                ) || self.lines.values().any(|l| hit(&l.line.unit_id))
            }
            EntityKind::RecipeCategory => self.rows_of(EntityKind::Recipe).any(
                |(_, r)| matches!(&r.fields, EntityFields::Recipe(f) if hit(&f.category_id)),
            ),
            EntityKind::Ingredient => self.lines.values().any(|l| hit(&l.line.ingredient_id)),
            _ => false,
        };
        if restricted {
            return Err(StoreError::ForeignKey(format!(
                "{kind} rows are still referenced by dependent rows"
            )));
        }

        match kind {
            EntityKind::Category => {
                for row in self.rows_of_mut(EntityKind::Category) {
                    if let EntityFields::Category(f) = &mut row.fields {
                        if f.parent_id.as_ref().is_some_and(hit) {
                            f.parent_id = None;
                        }
                    }
                }
            }
            EntityKind::Supplier => {
                for row in self.rows_of_mut(EntityKind::Ingredient) {
                    if let EntityFields::Ingredient(f) = &mut row.fields {
                        if f.supplier_id.as_ref().is_some_and(hit) {
                            f.supplier_id = None;
                        }
                    }
                }
            }
            EntityKind::RecipeFamily => {
                for row in self.rows_of_mut(EntityKind::Recipe) {
                    if let EntityFields::Recipe(f) = &mut row.fields {
                        if f.family_id.as_ref().is_some_and(hit) {
                            f.family_id = None;
                        }
                    }
                }
            }
            EntityKind::Recipe => self.lines.retain(|_, l| !hit(&l.recipe_id)),
            _ => {}
        }

        let table = self.rows.entry(kind).or_default();
        let before = table.len();
        table.retain(|id, _| !hit(id));
        Ok((before - table.len()) as u64)
    }

    fn recipe_view(&self, id: &str, row: &Row) -> Option<RecipeView> {
        let EntityFields::Recipe(recipe) = &row.fields else {
            return None;
        };
        let category_name = match self.get(EntityKind::RecipeCategory, &recipe.category_id) {
            Some(r) => r.fields.name().to_string(),
            None => String::new(),
        };
        let family_name = recipe
            .family_id
            .as_deref()
            .and_then(|fid| self.get(EntityKind::RecipeFamily, fid))
            .map(|r| r.fields.name().to_string());

        let mut lines: Vec<&RecipeLineWrite> = self
            .lines
            .values()
            .filter(|l| l.recipe_id == id)
            .map(|l| &l.line)
            .collect();
        lines.sort_by_key(|l| l.position);
        let lines = lines
            .into_iter()
            .map(|l| RecipeLineView {
                ingredient_name: self
                    .get(EntityKind::Ingredient, &l.ingredient_id)
                    .map(|r| r.fields.name().to_string())
                    .unwrap_or_default(),
                quantity: l.quantity,
                unit_abbreviation: match self.get(EntityKind::MeasureUnit, &l.unit_id).map(|r| &r.fields) {
                    Some(EntityFields::MeasureUnit(u)) => u.abbreviation.clone(),
                    _ => String::new(),
                },
            })
            .collect();

        Some(RecipeView {
            id: id.to_string(),
            name: recipe.name.clone(),
            category_name,
            family_name,
            description: recipe.description.clone(),
            prep_time_min: recipe.prep_time_min,
            cook_time_min: recipe.cook_time_min,
            servings: recipe.servings,
            allergens: recipe.allergens.clone(),
            lines,
        })
    }
}

/// In-memory implementation of both [`TargetStore`] and [`RetrievalIndex`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a locally authored row (no source identifier).
    pub async fn insert_native(&self, fields: EntityFields) -> StoreResult<String> {
        self.tables.lock().await.insert(None, fields)
    }

    /// Add a line to an existing recipe without touching its other lines.
    pub async fn insert_native_line(&self, recipe_id: &str, line: RecipeLineWrite) -> StoreResult<String> {
        let mut tables = self.tables.lock().await;
        tables.require(EntityKind::Recipe, recipe_id, EntityKind::RecipeLine)?;
        tables.check_line(&line)?;
        Ok(tables.insert_line(recipe_id, line))
    }

    /// Make every subsequent create/update of this record fail.
    pub async fn fail_writes_for(&self, kind: EntityKind, source_id: impl Into<String>) {
        self.tables
            .lock()
            .await
            .failing
            .insert((kind, source_id.into()));
    }

    pub async fn fields(&self, kind: EntityKind, id: &str) -> Option<EntityFields> {
        self.tables.lock().await.get(kind, id).map(|r| r.fields.clone())
    }

    pub async fn lines_for(&self, recipe_id: &str) -> Vec<RecipeLineWrite> {
        let tables = self.tables.lock().await;
        let mut lines: Vec<RecipeLineWrite> = tables
            .lines
            .values()
            .filter(|l| l.recipe_id == recipe_id)
            .map(|l| l.line.clone())
            .collect();
        lines.sort_by_key(|l| l.position);
        lines
    }

    pub async fn documents(&self, source: &str) -> Vec<KnowledgeDocument> {
        self.tables
            .lock()
            .await
            .documents
            .iter()
            .filter(|d| d.doc.source == source)
            .map(|d| d.doc.clone())
            .collect()
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn find_by_source_id(&self, kind: EntityKind, source_id: &str) -> StoreResult<Option<String>> {
        let tables = self.tables.lock().await;
        let found = tables
            .rows_of(kind)
            .find(|(_, r)| r.source_id.as_deref() == Some(source_id))
            .map(|(id, _)| id.clone());
        Ok(found)
    }

    async fn create(&self, payload: &WritePayload) -> StoreResult<String> {
        let mut tables = self.tables.lock().await;
        tables.check_injected(payload)?;
        tables.insert(Some(payload.source_id.clone()), payload.fields.clone())
    }

    async fn update(&self, id: &str, payload: &WritePayload) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.check_injected(payload)?;
        let kind = payload.kind();
        if !tables.exists(kind, id) {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        tables.check_references(&payload.fields)?;
        let row = tables
            .rows
            .entry(kind)
            .or_default()
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        if !row.fields.merge_from(&payload.fields) {
            return Err(StoreError::Unsupported(kind));
        }
        Ok(())
    }

    async fn set_category_parent(&self, category_id: &str, parent_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.require(EntityKind::Category, parent_id, EntityKind::Category)?;
        match tables
            .rows
            .entry(EntityKind::Category)
            .or_default()
            .get_mut(category_id)
            .map(|r| &mut r.fields)
        {
            Some(EntityFields::Category(f)) => {
                f.parent_id = Some(parent_id.to_string());
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                kind: EntityKind::Category,
                id: category_id.to_string(),
            }),
        }
    }

    async fn replace_recipe_lines(&self, recipe_id: &str, lines: &[RecipeLineWrite]) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        if !tables.exists(EntityKind::Recipe, recipe_id) {
            return Err(StoreError::NotFound {
                kind: EntityKind::Recipe,
                id: recipe_id.to_string(),
            });
        }
        for line in lines {
            tables.check_line(line)?;
        }
        tables.lines.retain(|_, l| l.recipe_id != recipe_id);
        for line in lines {
            tables.insert_line(recipe_id, line.clone());
        }
        Ok(lines.len())
    }

    async fn load_recipes_by_origin(&self, origin: &str) -> StoreResult<Vec<RecipeView>> {
        let tables = self.tables.lock().await;
        let mut views: Vec<RecipeView> = tables
            .rows_of(EntityKind::Recipe)
            .filter(|(_, r)| {
                matches!(&r.fields, EntityFields::Recipe(f) if f.origin.as_deref() == Some(origin))
            })
            .filter_map(|(id, r)| tables.recipe_view(id, r))
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(views)
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<u64> {
        let tables = self.tables.lock().await;
        let n = match kind {
            EntityKind::RecipeLine => tables.lines.len(),
            EntityKind::KnowledgeDocument => tables.documents.len(),
            _ => tables.rows_of(kind).count(),
        };
        Ok(n as u64)
    }

    async fn count_synced(&self, kind: EntityKind) -> StoreResult<u64> {
        let tables = self.tables.lock().await;
        let n = match kind {
            EntityKind::KnowledgeDocument => return Err(StoreError::Unsupported(kind)),
            EntityKind::RecipeLine => tables
                .lines
                .values()
                .filter(|l| {
                    tables
                        .get(EntityKind::Recipe, &l.recipe_id)
                        .is_some_and(|r| r.source_id.is_some())
                })
                .count(),
            _ => tables
                .rows_of(kind)
                .filter(|(_, r)| r.source_id.is_some())
                .count(),
        };
        Ok(n as u64)
    }

    async fn delete_foreign_recipe_lines(&self, origin: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let doomed: Vec<String> = tables
            .lines
            .iter()
            .filter(|(_, l)| {
                let synced_ingredient = tables
                    .get(EntityKind::Ingredient, &l.line.ingredient_id)
                    .is_some_and(|r| r.source_id.is_some());
                let foreign_recipe = !matches!(
                    tables.get(EntityKind::Recipe, &l.recipe_id).map(|r| &r.fields),
                    Some(EntityFields::Recipe(f)) if f.origin.as_deref() == Some(origin)
                );
                synced_ingredient && foreign_recipe
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            tables.lines.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_recipes_by_origin(&self, origin: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let ids: HashSet<String> = tables
            .rows_of(EntityKind::Recipe)
            .filter(|(_, r)| {
                matches!(&r.fields, EntityFields::Recipe(f) if f.origin.as_deref() == Some(origin))
            })
            .map(|(id, _)| id.clone())
            .collect();
        tables.delete_rows(EntityKind::Recipe, &ids)
    }

    async fn delete_synced(&self, kind: EntityKind) -> StoreResult<u64> {
        if matches!(kind, EntityKind::RecipeLine | EntityKind::KnowledgeDocument) {
            return Err(StoreError::Unsupported(kind));
        }
        let mut tables = self.tables.lock().await;
        let ids: HashSet<String> = tables
            .rows_of(kind)
            .filter(|(_, r)| r.source_id.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        tables.delete_rows(kind, &ids)
    }
}

#[async_trait]
impl RetrievalIndex for MemoryStore {
    async fn delete_documents_by_source(&self, source: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.documents.len();
        tables.documents.retain(|d| d.doc.source != source);
        Ok((before - tables.documents.len()) as u64)
    }

    async fn bulk_upsert_documents(&self, docs: &[KnowledgeDocument]) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut positions: HashMap<(String, String), usize> = tables
            .documents
            .iter()
            .enumerate()
            .map(|(i, d)| ((d.doc.source.clone(), d.doc.title.clone()), i))
            .collect();
        let mut stored: HashSet<(String, String)> = HashSet::new();
        for doc in docs {
            let key = (doc.source.clone(), doc.title.clone());
            let row = DocumentRow {
                doc: doc.clone(),
                published_at: now,
            };
            match positions.get(&key) {
                Some(&i) => tables.documents[i] = row,
                None => {
                    positions.insert(key.clone(), tables.documents.len());
                    tables.documents.push(row);
                }
            }
            stored.insert(key);
        }
        Ok(stored.len())
    }

    async fn source_summary(&self, source: &str) -> StoreResult<SourceSummary> {
        let tables = self.tables.lock().await;
        let matching = tables.documents.iter().filter(|d| d.doc.source == source);
        Ok(SourceSummary {
            documents: matching.clone().count() as u64,
            last_published_at: matching.map(|d| d.published_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcs_core::{
        CategoryFields, GroupFields, IngredientFields, MeasureUnitFields, RecipeFields,
        RecipeStatus, UnitType,
    };

    fn unit(source_id: &str) -> WritePayload {
        WritePayload::new(
            source_id,
            EntityFields::MeasureUnit(MeasureUnitFields {
                name: "kg".into(),
                abbreviation: "kg".into(),
                unit_type: UnitType::Weight,
                conversion_factor: None,
                is_base: None,
            }),
        )
    }

    fn category(source_id: &str) -> WritePayload {
        WritePayload::new(
            source_id,
            EntityFields::Category(CategoryFields {
                name: "Carnes".into(),
                description: None,
                parent_id: None,
            }),
        )
    }

    fn ingredient(source_id: &str, category_id: &str, unit_id: &str) -> WritePayload {
        WritePayload::new(
            source_id,
            EntityFields::Ingredient(IngredientFields {
                name: "Solomillo".into(),
                category_id: category_id.into(),
                unit_id: unit_id.into(),
                supplier_id: None,
                cost: 12.5,
                tax_rate: None,
                status: None,
                current_stock: None,
                min_stock: None,
                max_stock: None,
                description: None,
            }),
        )
    }

    fn recipe_fields(category_id: &str, origin: Option<&str>) -> RecipeFields {
        RecipeFields {
            name: "Steak".into(),
            category_id: category_id.into(),
            family_id: None,
            origin: origin.map(str::to_string),
            status: RecipeStatus::Active,
            description: None,
            theoretical_cost: None,
            real_cost: None,
            allergens: vec![],
            prep_time_min: None,
            cook_time_min: None,
            servings: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_foreign_keys() {
        let store = MemoryStore::new();
        let err = store
            .create(&ingredient("101", "nope", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey(_)));
        assert_eq!(store.count(EntityKind::Ingredient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_source_id_is_rejected() {
        let store = MemoryStore::new();
        store.create(&unit("7")).await.unwrap();
        let err = store.create(&unit("7")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn deleting_referenced_category_is_restricted() {
        let store = MemoryStore::new();
        let unit_id = store.create(&unit("7")).await.unwrap();
        let category_id = store.create(&category("3")).await.unwrap();
        store
            .create(&ingredient("101", &category_id, &unit_id))
            .await
            .unwrap();

        let err = store.delete_synced(EntityKind::Category).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey(_)));
        assert_eq!(store.count(EntityKind::Category).await.unwrap(), 1);

        assert_eq!(store.delete_synced(EntityKind::Ingredient).await.unwrap(), 1);
        assert_eq!(store.delete_synced(EntityKind::Category).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upserting_a_repeated_title_counts_one_stored_row() {
        let store = MemoryStore::new();
        let docs = [
            KnowledgeDocument::new("Recipe: Salad", "first", "Recipes", "catalog-api-recipes"),
            KnowledgeDocument::new("Recipe: Salad", "second", "Recipes", "catalog-api-recipes"),
            KnowledgeDocument::new("Recipe: Soup", "third", "Recipes", "catalog-api-recipes"),
        ];
        assert_eq!(store.bulk_upsert_documents(&docs).await.unwrap(), 2);
        let stored = store.documents("catalog-api-recipes").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "second");
    }

    #[tokio::test]
    async fn deleting_recipes_cascades_their_lines() {
        let store = MemoryStore::new();
        let unit_id = store.create(&unit("7")).await.unwrap();
        let category_id = store.create(&category("3")).await.unwrap();
        let ingredient_id = store
            .create(&ingredient("101", &category_id, &unit_id))
            .await
            .unwrap();
        let recipe_category = store
            .create(&WritePayload::new(
                "1",
                EntityFields::RecipeCategory(GroupFields {
                    name: "Mains".into(),
                    description: None,
                }),
            ))
            .await
            .unwrap();
        let recipe_id = store
            .create(&WritePayload::new(
                "900",
                EntityFields::Recipe(recipe_fields(&recipe_category, Some("catalog-api"))),
            ))
            .await
            .unwrap();
        store
            .replace_recipe_lines(
                &recipe_id,
                &[RecipeLineWrite {
                    ingredient_id,
                    unit_id,
                    quantity: 0.25,
                    position: 0,
                }],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_recipes_by_origin("catalog-api").await.unwrap(), 1);
        assert_eq!(store.count(EntityKind::RecipeLine).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_keeps_target_native_fields() {
        let store = MemoryStore::new();
        let recipe_category = store
            .create(&WritePayload::new(
                "1",
                EntityFields::RecipeCategory(GroupFields {
                    name: "Mains".into(),
                    description: Some("hot dishes".into()),
                }),
            ))
            .await
            .unwrap();
        let mut fields = recipe_fields(&recipe_category, Some("catalog-api"));
        fields.servings = Some(4);
        let recipe_id = store
            .create(&WritePayload::new("900", EntityFields::Recipe(fields)))
            .await
            .unwrap();

        let mut incoming = recipe_fields(&recipe_category, Some("catalog-api"));
        incoming.name = "Grilled steak".into();
        store
            .update(&recipe_id, &WritePayload::new("900", EntityFields::Recipe(incoming)))
            .await
            .unwrap();

        let Some(EntityFields::Recipe(stored)) = store.fields(EntityKind::Recipe, &recipe_id).await
        else {
            panic!("recipe missing");
        };
        assert_eq!(stored.name, "Grilled steak");
        assert_eq!(stored.servings, Some(4));
    }

    #[tokio::test]
    async fn documents_upsert_by_source_and_title() {
        let store = MemoryStore::new();
        let first = KnowledgeDocument::new("Recipe: Soup", "v1", "Recipes", "test");
        let second = KnowledgeDocument::new("Recipe: Soup", "v2", "Recipes", "test");
        let other = KnowledgeDocument::new("Recipe: Soup", "manual", "Recipes", "manual");

        store.bulk_upsert_documents(&[first, other]).await.unwrap();
        store.bulk_upsert_documents(&[second]).await.unwrap();

        let docs = store.documents("test").await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "v2");

        assert_eq!(store.delete_documents_by_source("test").await.unwrap(), 1);
        let summary = store.source_summary("manual").await.unwrap();
        assert_eq!(summary.documents, 1);
        assert!(summary.last_published_at.is_some());
    }
}
