use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcs_core::{
    Allergen, EntityFields, EntityKind, KnowledgeDocument, RecipeLineView, RecipeLineWrite,
    RecipeView, WritePayload,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{RetrievalIndex, SourceSummary, StoreError, StoreResult, TargetStore};

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::MeasureUnit => "measure_units",
        EntityKind::Category => "categories",
        EntityKind::RecipeCategory => "recipe_categories",
        EntityKind::RecipeFamily => "recipe_families",
        EntityKind::Supplier => "suppliers",
        EntityKind::Ingredient => "ingredients",
        EntityKind::Recipe => "recipes",
        EntityKind::RecipeLine => "recipe_lines",
        EntityKind::KnowledgeDocument => "knowledge_documents",
    }
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn classify(err: sqlx::Error, kind: EntityKind, source_id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate {
                kind,
                source_id: source_id.to_string(),
            };
        }
        if db.is_foreign_key_violation() {
            return StoreError::ForeignKey(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

fn classify_delete(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::ForeignKey(db.message().to_string())
        }
        _ => StoreError::Database(err),
    }
}

/// PostgreSQL-backed store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn insert(&self, id: &str, payload: &WritePayload) -> Result<(), sqlx::Error> {
        let sid = payload.source_id.as_str();
        match &payload.fields {
            EntityFields::MeasureUnit(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO measure_units (id, source_id, name, abbreviation, unit_type, conversion_factor, is_base)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.abbreviation)
                .bind(f.unit_type.code())
                .bind(f.conversion_factor)
                .bind(f.is_base)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Category(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO categories (id, source_id, name, description, parent_id)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.description)
                .bind(&f.parent_id)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::RecipeCategory(f) | EntityFields::RecipeFamily(f) => {
                let sql = format!(
                    "INSERT INTO {} (id, source_id, name, description) VALUES ($1, $2, $3, $4)",
                    table(payload.kind())
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(sid)
                    .bind(&f.name)
                    .bind(&f.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Supplier(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO suppliers (
                        id, source_id, name, code, commercial_name, email, phone, mobile,
                        contact_person, web, address, city, postal_code, province, country,
                        tax_id, payment_terms, min_order, discount, delivery_days, notes,
                        active, category_name, subcategory_name
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                            $16, $17, $18, $19, $20, $21, $22, $23, $24)
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.code)
                .bind(&f.commercial_name)
                .bind(&f.email)
                .bind(&f.phone)
                .bind(&f.mobile)
                .bind(&f.contact_person)
                .bind(&f.web)
                .bind(&f.address)
                .bind(&f.city)
                .bind(&f.postal_code)
                .bind(&f.province)
                .bind(&f.country)
                .bind(&f.tax_id)
                .bind(&f.payment_terms)
                .bind(f.min_order)
                .bind(f.discount)
                .bind(&f.delivery_days)
                .bind(&f.notes)
                .bind(f.active)
                .bind(&f.category_name)
                .bind(&f.subcategory_name)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Ingredient(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO ingredients (
                        id, source_id, name, category_id, unit_id, supplier_id, cost, tax_rate,
                        status, current_stock, min_stock, max_stock, description
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.category_id)
                .bind(&f.unit_id)
                .bind(&f.supplier_id)
                .bind(f.cost)
                .bind(f.tax_rate)
                .bind(f.status.map(|s| s.code()))
                .bind(f.current_stock)
                .bind(f.min_stock)
                .bind(f.max_stock)
                .bind(&f.description)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Recipe(f) => {
                let allergens: Vec<String> = f.allergens.iter().map(|a| a.code().to_string()).collect();
                sqlx::query(
                    r#"
                    INSERT INTO recipes (
                        id, source_id, name, category_id, family_id, origin, status, description,
                        theoretical_cost, real_cost, allergens, prep_time_min, cook_time_min, servings
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.category_id)
                .bind(&f.family_id)
                .bind(&f.origin)
                .bind(f.status.code())
                .bind(&f.description)
                .bind(f.theoretical_cost)
                .bind(f.real_cost)
                .bind(allergens)
                .bind(to_i32(f.prep_time_min))
                .bind(to_i32(f.cook_time_min))
                .bind(to_i32(f.servings))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn apply_update(&self, id: &str, payload: &WritePayload) -> Result<u64, sqlx::Error> {
        let sid = payload.source_id.as_str();
        let result = match &payload.fields {
            EntityFields::MeasureUnit(f) => {
                sqlx::query(
                    r#"
                    UPDATE measure_units
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           abbreviation = $4,
                           unit_type = $5,
                           conversion_factor = COALESCE($6, conversion_factor),
                           is_base = COALESCE($7, is_base),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.abbreviation)
                .bind(f.unit_type.code())
                .bind(f.conversion_factor)
                .bind(f.is_base)
                .execute(&self.pool)
                .await?
            }
            EntityFields::Category(f) => {
                sqlx::query(
                    r#"
                    UPDATE categories
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           description = COALESCE($4, description),
                           parent_id = COALESCE($5, parent_id),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.description)
                .bind(&f.parent_id)
                .execute(&self.pool)
                .await?
            }
            EntityFields::RecipeCategory(f) | EntityFields::RecipeFamily(f) => {
                let sql = format!(
                    r#"
                    UPDATE {}
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           description = COALESCE($4, description),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                    table(payload.kind())
                );
                sqlx::query(&sql)
                    .bind(id)
                    .bind(sid)
                    .bind(&f.name)
                    .bind(&f.description)
                    .execute(&self.pool)
                    .await?
            }
            EntityFields::Supplier(f) => {
                sqlx::query(
                    r#"
                    UPDATE suppliers
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           code = COALESCE($4, code),
                           commercial_name = COALESCE($5, commercial_name),
                           email = COALESCE($6, email),
                           phone = COALESCE($7, phone),
                           mobile = COALESCE($8, mobile),
                           contact_person = COALESCE($9, contact_person),
                           web = COALESCE($10, web),
                           address = COALESCE($11, address),
                           city = COALESCE($12, city),
                           postal_code = COALESCE($13, postal_code),
                           province = COALESCE($14, province),
                           country = COALESCE($15, country),
                           tax_id = COALESCE($16, tax_id),
                           payment_terms = COALESCE($17, payment_terms),
                           min_order = COALESCE($18, min_order),
                           discount = COALESCE($19, discount),
                           delivery_days = COALESCE($20, delivery_days),
                           notes = COALESCE($21, notes),
                           active = COALESCE($22, active),
                           category_name = COALESCE($23, category_name),
                           subcategory_name = COALESCE($24, subcategory_name),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.code)
                .bind(&f.commercial_name)
                .bind(&f.email)
                .bind(&f.phone)
                .bind(&f.mobile)
                .bind(&f.contact_person)
                .bind(&f.web)
                .bind(&f.address)
                .bind(&f.city)
                .bind(&f.postal_code)
                .bind(&f.province)
                .bind(&f.country)
                .bind(&f.tax_id)
                .bind(&f.payment_terms)
                .bind(f.min_order)
                .bind(f.discount)
                .bind(&f.delivery_days)
                .bind(&f.notes)
                .bind(f.active)
                .bind(&f.category_name)
                .bind(&f.subcategory_name)
                .execute(&self.pool)
                .await?
            }
            EntityFields::Ingredient(f) => {
                sqlx::query(
                    r#"
                    UPDATE ingredients
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           category_id = $4,
                           unit_id = $5,
                           supplier_id = COALESCE($6, supplier_id),
                           cost = $7,
                           tax_rate = COALESCE($8, tax_rate),
                           status = COALESCE($9, status),
                           current_stock = COALESCE($10, current_stock),
                           min_stock = COALESCE($11, min_stock),
                           max_stock = COALESCE($12, max_stock),
                           description = COALESCE($13, description),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.category_id)
                .bind(&f.unit_id)
                .bind(&f.supplier_id)
                .bind(f.cost)
                .bind(f.tax_rate)
                .bind(f.status.map(|s| s.code()))
                .bind(f.current_stock)
                .bind(f.min_stock)
                .bind(f.max_stock)
                .bind(&f.description)
                .execute(&self.pool)
                .await?
            }
            EntityFields::Recipe(f) => {
                let allergens: Vec<String> = f.allergens.iter().map(|a| a.code().to_string()).collect();
                sqlx::query(
                    r#"
                    UPDATE recipes
                       SET source_id = COALESCE($2, source_id),
                           name = $3,
                           category_id = $4,
                           family_id = COALESCE($5, family_id),
                           origin = COALESCE($6, origin),
                           status = $7,
                           description = COALESCE($8, description),
                           theoretical_cost = COALESCE($9, theoretical_cost),
                           real_cost = COALESCE($10, real_cost),
                           allergens = $11,
                           prep_time_min = COALESCE($12, prep_time_min),
                           cook_time_min = COALESCE($13, cook_time_min),
                           servings = COALESCE($14, servings),
                           updated_at = NOW()
                     WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(sid)
                .bind(&f.name)
                .bind(&f.category_id)
                .bind(&f.family_id)
                .bind(&f.origin)
                .bind(f.status.code())
                .bind(&f.description)
                .bind(f.theoretical_cost)
                .bind(f.real_cost)
                .bind(allergens)
                .bind(to_i32(f.prep_time_min))
                .bind(to_i32(f.cook_time_min))
                .bind(to_i32(f.servings))
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TargetStore for PgStore {
    async fn find_by_source_id(&self, kind: EntityKind, source_id: &str) -> StoreResult<Option<String>> {
        if matches!(kind, EntityKind::RecipeLine | EntityKind::KnowledgeDocument) {
            return Err(StoreError::Unsupported(kind));
        }
        let sql = format!("SELECT id FROM {} WHERE source_id = $1", table(kind));
        let row = sqlx::query(&sql)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }

    async fn create(&self, payload: &WritePayload) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        self.insert(&id, payload)
            .await
            .map_err(|err| classify(err, payload.kind(), &payload.source_id))?;
        debug!(kind = %payload.kind(), source_id = %payload.source_id, %id, "row created");
        Ok(id)
    }

    async fn update(&self, id: &str, payload: &WritePayload) -> StoreResult<()> {
        let affected = self
            .apply_update(id, payload)
            .await
            .map_err(|err| classify(err, payload.kind(), &payload.source_id))?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: payload.kind(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_category_parent(&self, category_id: &str, parent_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE categories SET parent_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(category_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await
            .map_err(classify_delete)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: EntityKind::Category,
                id: category_id.to_string(),
            });
        }
        Ok(())
    }

    async fn replace_recipe_lines(&self, recipe_id: &str, lines: &[RecipeLineWrite]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM recipes WHERE id = $1")
            .bind(recipe_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                kind: EntityKind::Recipe,
                id: recipe_id.to_string(),
            });
        }
        sqlx::query("DELETE FROM recipe_lines WHERE recipe_id = $1")
            .bind(recipe_id)
            .execute(&mut *tx)
            .await?;
        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO recipe_lines (id, recipe_id, ingredient_id, unit_id, quantity, position)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(recipe_id)
            .bind(&line.ingredient_id)
            .bind(&line.unit_id)
            .bind(line.quantity)
            .bind(i32::try_from(line.position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await
            .map_err(classify_delete)?;
        }
        tx.commit().await?;
        Ok(lines.len())
    }

    async fn load_recipes_by_origin(&self, origin: &str) -> StoreResult<Vec<RecipeView>> {
        let line_rows = sqlx::query(
            r#"
            SELECT rl.recipe_id, i.name AS ingredient_name, rl.quantity, mu.abbreviation
              FROM recipe_lines rl
              JOIN recipes r ON r.id = rl.recipe_id
              JOIN ingredients i ON i.id = rl.ingredient_id
              JOIN measure_units mu ON mu.id = rl.unit_id
             WHERE r.origin = $1
             ORDER BY rl.recipe_id, rl.position
            "#,
        )
        .bind(origin)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<String, Vec<RecipeLineView>> = HashMap::new();
        for row in line_rows {
            let recipe_id: String = row.try_get("recipe_id")?;
            lines.entry(recipe_id).or_default().push(RecipeLineView {
                ingredient_name: row.try_get("ingredient_name")?,
                quantity: row.try_get("quantity")?,
                unit_abbreviation: row.try_get("abbreviation")?,
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, rc.name AS category_name, rf.name AS family_name,
                   r.description, r.prep_time_min, r.cook_time_min, r.servings, r.allergens
              FROM recipes r
              JOIN recipe_categories rc ON rc.id = r.category_id
              LEFT JOIN recipe_families rf ON rf.id = r.family_id
             WHERE r.origin = $1
             ORDER BY r.name
            "#,
        )
        .bind(origin)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let codes: Vec<String> = row.try_get("allergens")?;
            out.push(RecipeView {
                lines: lines.remove(&id).unwrap_or_default(),
                id,
                name: row.try_get("name")?,
                category_name: row.try_get("category_name")?,
                family_name: row.try_get("family_name")?,
                description: row.try_get("description")?,
                prep_time_min: to_u32(row.try_get("prep_time_min")?),
                cook_time_min: to_u32(row.try_get("cook_time_min")?),
                servings: to_u32(row.try_get("servings")?),
                allergens: codes.iter().filter_map(|c| Allergen::from_code(c)).collect(),
            });
        }
        Ok(out)
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", table(kind));
        let n: i64 = sqlx::query(&sql).fetch_one(&self.pool).await?.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn count_synced(&self, kind: EntityKind) -> StoreResult<u64> {
        let sql = match kind {
            EntityKind::KnowledgeDocument => return Err(StoreError::Unsupported(kind)),
            EntityKind::RecipeLine => r#"
                SELECT COUNT(*) AS n
                  FROM recipe_lines rl
                  JOIN recipes r ON r.id = rl.recipe_id
                 WHERE r.source_id IS NOT NULL
                "#
            .to_string(),
            _ => format!(
                "SELECT COUNT(*) AS n FROM {} WHERE source_id IS NOT NULL",
                table(kind)
            ),
        };
        let n: i64 = sqlx::query(&sql).fetch_one(&self.pool).await?.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    async fn delete_foreign_recipe_lines(&self, origin: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM recipe_lines rl
             USING ingredients i, recipes r
             WHERE rl.ingredient_id = i.id
               AND rl.recipe_id = r.id
               AND i.source_id IS NOT NULL
               AND r.origin IS DISTINCT FROM $1
            "#,
        )
        .bind(origin)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_recipes_by_origin(&self, origin: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM recipes WHERE origin = $1")
            .bind(origin)
            .execute(&self.pool)
            .await
            .map_err(classify_delete)?;
        Ok(result.rows_affected())
    }

    async fn delete_synced(&self, kind: EntityKind) -> StoreResult<u64> {
        if matches!(kind, EntityKind::RecipeLine | EntityKind::KnowledgeDocument) {
            return Err(StoreError::Unsupported(kind));
        }
        let sql = format!("DELETE FROM {} WHERE source_id IS NOT NULL", table(kind));
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(classify_delete)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RetrievalIndex for PgStore {
    async fn delete_documents_by_source(&self, source: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM knowledge_documents WHERE source = $1")
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn bulk_upsert_documents(&self, docs: &[KnowledgeDocument]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO knowledge_documents (id, title, content, section, source, language, content_hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (source, title) DO UPDATE
                   SET content = EXCLUDED.content,
                       section = EXCLUDED.section,
                       language = EXCLUDED.language,
                       content_hash = EXCLUDED.content_hash,
                       published_at = NOW()
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(&doc.section)
            .bind(&doc.source)
            .bind(&doc.language)
            .bind(&doc.content_hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        // a repeated (source, title) overwrites the earlier row in place
        let stored: HashSet<(&str, &str)> = docs
            .iter()
            .map(|d| (d.source.as_str(), d.title.as_str()))
            .collect();
        Ok(stored.len())
    }

    async fn source_summary(&self, source: &str) -> StoreResult<SourceSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n, MAX(published_at) AS last_published_at
              FROM knowledge_documents
             WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        let last_published_at: Option<DateTime<Utc>> = row.try_get("last_published_at")?;
        Ok(SourceSummary {
            documents: n.max(0) as u64,
            last_published_at,
        })
    }
}
