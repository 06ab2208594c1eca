use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rcs_core::{
    Allergen, EntityFields, EntityKind, GroupFields, RecipeFields, RecipeLineWrite, RecipeStatus,
    UnitType, KNOWLEDGE_SOURCE,
};
use rcs_source::{InMemorySource, SourceClient, SourceError, SourcePage};
use rcs_storage::{MemoryStore, StoreError, TargetStore};
use rcs_sync::{PurgeError, SyncEngine, SyncOptions, FATAL_ERROR_PREFIX};
use serde_json::json;
use tokio::sync::Semaphore;

const CATALOG_KINDS: [EntityKind; 7] = [
    EntityKind::MeasureUnit,
    EntityKind::Category,
    EntityKind::RecipeCategory,
    EntityKind::RecipeFamily,
    EntityKind::Supplier,
    EntityKind::Ingredient,
    EntityKind::Recipe,
];

fn catalog() -> InMemorySource {
    InMemorySource::new()
        .with(
            "v1/product/purchases/units/measure",
            vec![
                json!({"id": 7, "name": "Kilogramo", "abbreviation": "kg", "type": "WEIGHT"}),
                json!({"id": 8, "name": "Gramo", "abbr": "g", "type": "WEIGHT"}),
                json!({"id": 9, "name": "   "}),
            ],
        )
        .with(
            "v1/product/purchases/categories",
            vec![
                json!({"id": 4, "name": "Ternera", "parentId": 3}),
                json!({"id": 3, "name": "Carnes"}),
                json!({"id": "5", "name": "Lácteos"}),
            ],
        )
        .with("v1/recipes/categories", vec![json!({"id": 1, "name": "Principales"})])
        .with("v1/recipes/families", vec![json!({"id": 2, "name": "Parrilla"})])
        .with(
            "v1/suppliers",
            vec![json!({"id": "S1", "name": "Makro", "email": "pedidos@makro.example"})],
        )
        .with(
            "v1/product/purchases",
            vec![
                json!({"id": 101, "name": "Solomillo", "categoryId": 3, "measureUnitId": 7,
                       "supplierId": "S1", "costPrice": 24.5}),
                json!({"id": 102, "name": "Mantequilla", "categoryId": 5, "measureUnitId": 8}),
                json!({"id": 103, "name": "Pan rallado", "categoryId": 99, "measureUnitId": 7}),
                json!({"name": "no id at all"}),
            ],
        )
        .with(
            "v2/recipes",
            vec![json!({
                "id": 900,
                "name": "Solomillo al whisky",
                "categoryId": 1,
                "familyId": 2,
                "allergens": ["DIOXIDO_AZUFRE"],
                "ingredients": [
                    {"productId": 101, "quantity": 0.25, "measureUnitId": 7},
                    {"productId": 102, "measureUnitId": 8},
                    {"productId": 103, "quantity": 1, "measureUnitId": 7}
                ]
            })],
        )
}

fn engine_with(source: impl SourceClient + 'static) -> (Arc<SyncEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(Arc::new(source), store.clone(), store.clone());
    (Arc::new(engine), store)
}

async fn id_of(store: &MemoryStore, kind: EntityKind, source_id: &str) -> String {
    store
        .find_by_source_id(kind, source_id)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{kind} {source_id} missing"))
}

#[tokio::test]
async fn full_run_writes_the_catalog_in_dependency_order() {
    let (engine, store) = engine_with(catalog());
    let report = engine.run_sync(SyncOptions::default()).await;

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(report.phases.len(), 8);
    let names: Vec<&str> = report.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(
        names,
        [
            "Measure units",
            "Categories",
            "Recipe categories",
            "Recipe families",
            "Suppliers",
            "Ingredients",
            "Recipes",
            "Knowledge base"
        ]
    );

    let units = report.phase("Measure units").unwrap();
    assert_eq!((units.created, units.skipped), (2, 1));
    let ingredients = report.phase("Ingredients").unwrap();
    assert_eq!((ingredients.created, ingredients.skipped), (2, 2));
    assert_eq!(report.phase("Recipes").unwrap().entity, "Recipe + RecipeLine");

    let kg = id_of(&store, EntityKind::MeasureUnit, "7").await;
    let carnes = id_of(&store, EntityKind::Category, "3").await;
    match store.fields(EntityKind::MeasureUnit, &kg).await {
        Some(EntityFields::MeasureUnit(f)) => {
            assert_eq!(f.abbreviation, "kg");
            assert_eq!(f.unit_type, UnitType::Weight);
        }
        other => panic!("unexpected {other:?}"),
    }
    let solomillo = id_of(&store, EntityKind::Ingredient, "101").await;
    match store.fields(EntityKind::Ingredient, &solomillo).await {
        Some(EntityFields::Ingredient(f)) => {
            assert_eq!(f.category_id, carnes);
            assert_eq!(f.unit_id, kg);
            assert_eq!(f.cost, 24.5);
            assert!(f.supplier_id.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }

    let ternera = id_of(&store, EntityKind::Category, "4").await;
    match store.fields(EntityKind::Category, &ternera).await {
        Some(EntityFields::Category(f)) => assert_eq!(f.parent_id.as_deref(), Some(carnes.as_str())),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn string_ids_resolve_ingredient_references() {
    let source = InMemorySource::new()
        .with("v1/product/purchases/units/measure", vec![json!({"id": "7", "name": "kg"})])
        .with("v1/product/purchases/categories", vec![json!({"id": "3", "name": "Carnes"})])
        .with(
            "v1/product/purchases",
            vec![json!({"id": "101", "name": "Solomillo", "categoryId": "3", "measureUnitId": "7"})],
        );
    let (engine, store) = engine_with(source);
    let report = engine.run_sync(SyncOptions::default()).await;
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(report.phase("Ingredients").unwrap().created, 1);

    let unit = id_of(&store, EntityKind::MeasureUnit, "7").await;
    let category = id_of(&store, EntityKind::Category, "3").await;
    let ingredient = id_of(&store, EntityKind::Ingredient, "101").await;
    match store.fields(EntityKind::Ingredient, &ingredient).await {
        Some(EntityFields::Ingredient(f)) => {
            assert_eq!(f.name, "Solomillo");
            assert_eq!(f.category_id, category);
            assert_eq!(f.unit_id, unit);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn mutual_category_parents_do_not_form_a_cycle() {
    let source = InMemorySource::new().with(
        "v1/product/purchases/categories",
        vec![
            json!({"id": 1, "name": "A", "parentId": 2}),
            json!({"id": 2, "name": "B", "parentId": 1}),
        ],
    );
    let (engine, store) = engine_with(source);
    let report = engine.run_sync(SyncOptions::default()).await;

    let categories = report.phase("Categories").unwrap();
    assert_eq!(categories.created, 2);
    assert_eq!(categories.errors.len(), 1);
    assert!(categories.errors[0].contains("cycle"), "{:?}", categories.errors);

    let a = id_of(&store, EntityKind::Category, "1").await;
    let b = id_of(&store, EntityKind::Category, "2").await;
    match store.fields(EntityKind::Category, &b).await {
        Some(EntityFields::Category(f)) => assert_eq!(f.parent_id.as_deref(), Some(a.as_str())),
        other => panic!("unexpected {other:?}"),
    }
    match store.fields(EntityKind::Category, &a).await {
        Some(EntityFields::Category(f)) => assert_eq!(f.parent_id, None),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn recipe_lines_and_allergens_follow_the_ingredients() {
    let (engine, store) = engine_with(catalog());
    engine.run_sync(SyncOptions::default()).await;

    let recipe = id_of(&store, EntityKind::Recipe, "900").await;
    let lines = store.lines_for(&recipe).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].position, 0);
    assert_eq!(lines[0].quantity, 0.25);
    assert_eq!(lines[1].position, 1);
    assert_eq!(lines[1].quantity, 1.0);

    match store.fields(EntityKind::Recipe, &recipe).await {
        Some(EntityFields::Recipe(f)) => {
            // unmapped product names still feed inference
            assert_eq!(
                f.allergens,
                vec![Allergen::Sulphites, Allergen::Gluten, Allergen::Dairy]
            );
            assert_eq!(f.origin.as_deref(), Some(rcs_core::RECIPE_ORIGIN));
            assert_eq!(f.status, RecipeStatus::Active);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn knowledge_base_is_republished_by_source() {
    let (engine, store) = engine_with(catalog());
    let report = engine.run_sync(SyncOptions::default()).await;

    assert_eq!(report.knowledge_base_document_count, 2 + 28);
    assert_eq!(report.phase("Knowledge base").unwrap().created, 30);
    let docs = store.documents(KNOWLEDGE_SOURCE).await;
    assert_eq!(docs.len(), 30);
    let allergens = docs
        .iter()
        .find(|d| d.title == "Allergens: Solomillo al whisky")
        .unwrap();
    assert!(allergens.content.contains("gluten"));

    engine.run_sync(SyncOptions::default()).await;
    assert_eq!(store.documents(KNOWLEDGE_SOURCE).await.len(), 30);
}

#[tokio::test]
async fn recipes_sharing_a_name_keep_separate_documents() {
    let source = InMemorySource::new()
        .with("v1/recipes/categories", vec![json!({"id": 1, "name": "Entrantes"})])
        .with(
            "v2/recipes",
            vec![
                json!({"id": 900, "name": "Ensalada", "categoryId": 1, "allergens": ["GLUTEN"]}),
                json!({"id": 901, "name": "Ensalada", "categoryId": 1}),
            ],
        );
    let (engine, store) = engine_with(source);
    let report = engine.run_sync(SyncOptions::default()).await;
    assert!(report.is_complete(), "{:?}", report.errors);

    assert_eq!(report.knowledge_base_document_count, 2 * 2 + 28);
    assert_eq!(report.phase("Knowledge base").unwrap().created, 32);
    let docs = store.documents(KNOWLEDGE_SOURCE).await;
    assert_eq!(docs.len(), 32);

    let with_gluten = id_of(&store, EntityKind::Recipe, "900").await;
    let without = id_of(&store, EntityKind::Recipe, "901").await;
    let statement = |id: &str| {
        let title = format!("Allergens: Ensalada [{id}]");
        docs.iter()
            .find(|d| d.title == title)
            .unwrap_or_else(|| panic!("{title} missing"))
            .content
            .clone()
    };
    assert!(statement(&with_gluten).contains("gluten"));
    assert!(statement(&without).contains("none declared"));
}

#[tokio::test]
async fn skipping_the_knowledge_base_leaves_documents_alone() {
    let (engine, store) = engine_with(catalog());
    let report = engine
        .run_sync(SyncOptions {
            skip_knowledge_base: true,
            ..SyncOptions::default()
        })
        .await;
    assert_eq!(report.phases.len(), 7);
    assert_eq!(report.knowledge_base_document_count, 0);
    assert!(store.documents(KNOWLEDGE_SOURCE).await.is_empty());
}

#[tokio::test]
async fn second_run_only_updates() {
    let (engine, store) = engine_with(catalog());
    let first = engine.run_sync(SyncOptions::default()).await;
    let mut counts = Vec::new();
    for kind in CATALOG_KINDS {
        counts.push(store.count(kind).await.unwrap());
    }

    let second = engine.run_sync(SyncOptions::default()).await;
    for (a, b) in first.phases.iter().zip(&second.phases).take(7) {
        assert_eq!(b.created, 0, "{} created rows again", b.phase);
        assert_eq!(b.updated, a.created, "{}", b.phase);
    }
    for (kind, before) in CATALOG_KINDS.into_iter().zip(counts) {
        assert_eq!(store.count(kind).await.unwrap(), before, "{kind}");
    }
    let recipe = id_of(&store, EntityKind::Recipe, "900").await;
    assert_eq!(store.lines_for(&recipe).await.len(), 2);
}

#[tokio::test]
async fn dry_run_reads_but_never_writes() {
    let (engine, store) = engine_with(catalog());
    let report = engine
        .run_sync(SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        })
        .await;

    assert!(report.dry_run);
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(report.phase("Ingredients").unwrap().created, 2);
    assert_eq!(report.phase("Recipes").unwrap().created, 1);
    for kind in CATALOG_KINDS {
        assert_eq!(store.count(kind).await.unwrap(), 0, "{kind}");
    }
    assert_eq!(store.count(EntityKind::RecipeLine).await.unwrap(), 0);
    assert!(store.documents(KNOWLEDGE_SOURCE).await.is_empty());
}

#[tokio::test]
async fn dry_run_after_a_real_run_reports_updates_and_skips_publishing() {
    let (engine, store) = engine_with(catalog());
    engine.run_sync(SyncOptions::default()).await;
    let docs_before = store.documents(KNOWLEDGE_SOURCE).await;

    let report = engine
        .run_sync(SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        })
        .await;
    assert_eq!(report.phase("Measure units").unwrap().updated, 2);
    let kb = report.phase("Knowledge base").unwrap();
    assert_eq!((kb.created, kb.skipped), (0, 30));
    assert_eq!(report.knowledge_base_document_count, 30);
    assert_eq!(store.documents(KNOWLEDGE_SOURCE).await, docs_before);
}

#[tokio::test]
async fn a_failing_record_does_not_stop_its_phase() {
    let (engine, store) = engine_with(catalog());
    store.fail_writes_for(EntityKind::Supplier, "S1").await;

    let report = engine.run_sync(SyncOptions::default()).await;
    assert!(report.is_complete());
    let suppliers = report.phase("Suppliers").unwrap();
    assert_eq!((suppliers.created, suppliers.skipped), (0, 1));
    assert_eq!(suppliers.errors.len(), 1);
    assert!(suppliers.errors[0].starts_with("Supplier \"Makro\": "));
    assert_eq!(report.errors, suppliers.errors);

    // the supplier is optional, so the ingredient still lands without it
    let solomillo = id_of(&store, EntityKind::Ingredient, "101").await;
    match store.fields(EntityKind::Ingredient, &solomillo).await {
        Some(EntityFields::Ingredient(f)) => assert!(f.supplier_id.is_none()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn fetch_failure_aborts_but_keeps_completed_phases() {
    let (engine, store) = engine_with(catalog().failing("v1/suppliers"));
    let report = engine.run_sync(SyncOptions::default()).await;

    assert!(!report.is_complete());
    assert_eq!(report.phases.len(), 4);
    let fatal = report.fatal_errors();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].starts_with(FATAL_ERROR_PREFIX));
    assert!(fatal[0].contains("v1/suppliers"));
    assert_eq!(store.count(EntityKind::MeasureUnit).await.unwrap(), 2);
    assert_eq!(store.count(EntityKind::Supplier).await.unwrap(), 0);
    assert_eq!(engine.last_report().await, Some(report));
}

#[tokio::test]
async fn progress_hook_sees_every_phase() {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = SyncOptions::default().with_progress(move |phase, detail| {
        sink.lock().unwrap().push(format!("{phase}: {detail}"));
    });
    let (engine, _store) = engine_with(catalog());
    engine.run_sync(options).await;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"Suppliers: fetching".to_string()));
    assert!(seen
        .iter()
        .any(|m| m.starts_with("Knowledge base: 30 created, 0 updated")));
}

#[tokio::test]
async fn purge_removes_synced_rows_and_keeps_native_ones() {
    let (engine, store) = engine_with(catalog());
    engine.run_sync(SyncOptions::default()).await;

    let native_group = store
        .insert_native(EntityFields::RecipeCategory(GroupFields {
            name: "Casa".into(),
            description: None,
        }))
        .await
        .unwrap();
    let native_recipe = store
        .insert_native(EntityFields::Recipe(RecipeFields {
            name: "Tortilla de la casa".into(),
            category_id: native_group,
            family_id: None,
            origin: None,
            status: RecipeStatus::Active,
            description: None,
            theoretical_cost: None,
            real_cost: None,
            allergens: vec![],
            prep_time_min: Some(20),
            cook_time_min: None,
            servings: None,
        }))
        .await
        .unwrap();
    store
        .insert_native_line(
            &native_recipe,
            RecipeLineWrite {
                ingredient_id: id_of(&store, EntityKind::Ingredient, "101").await,
                unit_id: id_of(&store, EntityKind::MeasureUnit, "7").await,
                quantity: 0.1,
                position: 0,
            },
        )
        .await
        .unwrap();

    let report = engine.purge().await.unwrap();
    assert_eq!(report.count(EntityKind::KnowledgeDocument), 30);
    assert_eq!(report.count(EntityKind::RecipeLine), 1);
    assert_eq!(report.count(EntityKind::Recipe), 1);
    assert_eq!(report.count(EntityKind::Ingredient), 2);
    assert_eq!(report.count(EntityKind::MeasureUnit), 2);

    for kind in CATALOG_KINDS {
        assert_eq!(store.count_synced(kind).await.unwrap(), 0, "{kind}");
    }
    assert_eq!(store.count(EntityKind::Recipe).await.unwrap(), 1);
    assert_eq!(store.count(EntityKind::RecipeCategory).await.unwrap(), 1);
    assert!(store.lines_for(&native_recipe).await.is_empty());
    assert!(store.documents(KNOWLEDGE_SOURCE).await.is_empty());
}

#[tokio::test]
async fn referenced_categories_cannot_be_deleted_first() {
    let (engine, store) = engine_with(catalog());
    engine.run_sync(SyncOptions::default()).await;

    let err = store.delete_synced(EntityKind::Category).await.unwrap_err();
    assert!(matches!(err, StoreError::ForeignKey(_)), "{err}");
    assert_eq!(store.count_synced(EntityKind::Category).await.unwrap(), 3);
}

#[tokio::test]
async fn status_reports_synced_rows_and_documents() {
    let (engine, _store) = engine_with(catalog());
    engine.run_sync(SyncOptions::default()).await;

    let status = engine.status().await.unwrap();
    assert!(!status.running);
    assert_eq!(status.synced_rows[&EntityKind::Ingredient], 2);
    assert_eq!(status.synced_rows[&EntityKind::RecipeLine], 2);
    assert_eq!(status.knowledge.documents, 30);
    assert!(status.last_report.is_some());
}

/// Source that parks every fetch until the test releases it.
struct GatedSource {
    gate: Arc<Semaphore>,
    inner: InMemorySource,
}

#[async_trait]
impl SourceClient for GatedSource {
    async fn fetch(&self, endpoint: &str) -> Result<SourcePage, SourceError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SourceError::Unavailable(endpoint.to_string()))?;
        self.inner.fetch(endpoint).await
    }
}

#[tokio::test]
async fn only_one_run_at_a_time() {
    let gate = Arc::new(Semaphore::new(0));
    let (engine, store) = engine_with(GatedSource {
        gate: Arc::clone(&gate),
        inner: catalog(),
    });

    let background = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_sync(SyncOptions::default()).await })
    };
    while !engine.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let rejected = engine.run_sync(SyncOptions::default()).await;
    assert!(rejected.phases.is_empty());
    assert_eq!(rejected.fatal_errors().len(), 1);
    assert!(rejected.errors[0].contains("already in progress"));
    assert!(matches!(engine.purge().await, Err(PurgeError::Busy)));

    gate.add_permits(Semaphore::MAX_PERMITS / 2);
    let finished = background.await.unwrap();
    assert!(finished.is_complete(), "{:?}", finished.errors);
    assert!(!engine.is_running());
    assert_eq!(store.count(EntityKind::Recipe).await.unwrap(), 1);
    assert_eq!(engine.last_report().await.map(|r| r.run_id), Some(finished.run_id));
}
