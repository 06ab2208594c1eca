//! Core domain model for the recipe catalog sync engine.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "rcs-core";

/// Origin label stamped on recipes created by the sync engine.
pub const RECIPE_ORIGIN: &str = "catalog-api";

/// Source label under which regenerated knowledge documents are published.
pub const KNOWLEDGE_SOURCE: &str = "catalog-api-recipes";

/// Every entity type the engine writes or deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    MeasureUnit,
    Category,
    RecipeCategory,
    RecipeFamily,
    Supplier,
    Ingredient,
    Recipe,
    RecipeLine,
    KnowledgeDocument,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeasureUnit => "measure_unit",
            Self::Category => "category",
            Self::RecipeCategory => "recipe_category",
            Self::RecipeFamily => "recipe_family",
            Self::Supplier => "supplier",
            Self::Ingredient => "ingredient",
            Self::Recipe => "recipe",
            Self::RecipeLine => "recipe_line",
            Self::KnowledgeDocument => "knowledge_document",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::MeasureUnit => "MeasureUnit",
            Self::Category => "Category",
            Self::RecipeCategory => "RecipeCategory",
            Self::RecipeFamily => "RecipeFamily",
            Self::Supplier => "Supplier",
            Self::Ingredient => "Ingredient",
            Self::Recipe => "Recipe",
            Self::RecipeLine => "RecipeLine",
            Self::KnowledgeDocument => "KnowledgeDocument",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The fourteen mandatory-declaration allergen categories.
///
/// Upstream codes are the source system's vocabulary and are matched exactly
/// (after trimming and upper-casing); anything else is dropped by the mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Allergen {
    Gluten,
    Crustaceans,
    Eggs,
    Fish,
    Peanuts,
    Soy,
    Dairy,
    TreeNuts,
    Celery,
    Mustard,
    Sesame,
    Sulphites,
    Lupin,
    Molluscs,
}

impl Allergen {
    pub const ALL: [Allergen; 14] = [
        Allergen::Gluten,
        Allergen::Crustaceans,
        Allergen::Eggs,
        Allergen::Fish,
        Allergen::Peanuts,
        Allergen::Soy,
        Allergen::Dairy,
        Allergen::TreeNuts,
        Allergen::Celery,
        Allergen::Mustard,
        Allergen::Sesame,
        Allergen::Sulphites,
        Allergen::Lupin,
        Allergen::Molluscs,
    ];

    /// Code used by the source system.
    pub fn code(self) -> &'static str {
        match self {
            Self::Gluten => "GLUTEN",
            Self::Crustaceans => "CRUSTACEOS",
            Self::Eggs => "HUEVOS",
            Self::Fish => "PESCADO",
            Self::Peanuts => "CACAHUETES",
            Self::Soy => "SOJA",
            Self::Dairy => "LACTEOS",
            Self::TreeNuts => "FRUTOS_SECOS",
            Self::Celery => "APIO",
            Self::Mustard => "MOSTAZA",
            Self::Sesame => "SESAMO",
            Self::Sulphites => "DIOXIDO_AZUFRE",
            Self::Lupin => "ALTRAMUCES",
            Self::Molluscs => "MOLUSCOS",
        }
    }

    pub fn from_code(raw: &str) -> Option<Self> {
        let code = raw.trim().to_uppercase();
        Self::ALL.into_iter().find(|a| a.code() == code)
    }

    /// Human label used in generated documents.
    pub fn label(self) -> &'static str {
        match self {
            Self::Gluten => "gluten",
            Self::Crustaceans => "crustaceans",
            Self::Eggs => "eggs",
            Self::Fish => "fish",
            Self::Peanuts => "peanuts",
            Self::Soy => "soy",
            Self::Dairy => "dairy",
            Self::TreeNuts => "tree nuts",
            Self::Celery => "celery",
            Self::Mustard => "mustard",
            Self::Sesame => "sesame",
            Self::Sulphites => "sulphur dioxide and sulphites",
            Self::Lupin => "lupin",
            Self::Molluscs => "molluscs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Volume,
    Weight,
    #[default]
    Unit,
}

impl UnitType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Volume => "VOLUME",
            Self::Weight => "WEIGHT",
            Self::Unit => "UNIT",
        }
    }

    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "VOLUME" => Some(Self::Volume),
            "WEIGHT" => Some(Self::Weight),
            "UNIT" => Some(Self::Unit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngredientStatus {
    Active,
    Inactive,
    Discontinued,
}

impl IngredientStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Discontinued => "DISCONTINUED",
        }
    }

    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "DISCONTINUED" => Some(Self::Discontinued),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipeStatus {
    #[default]
    Active,
    Draft,
    Archived,
}

impl RecipeStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Draft => "DRAFT",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "ACTIVE" => Some(Self::Active),
            "DRAFT" => Some(Self::Draft),
            "ARCHIVED" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Upstream identifiers arrive as strings or numbers; both collapse to the
/// string form used as the idempotency key. Empty strings and non-scalar
/// values yield `None`.
pub fn source_id_from_json(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => n
            .as_i64()
            .map(|v| v.to_string())
            .or_else(|| n.as_u64().map(|v| v.to_string()))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.to_string())),
        _ => None,
    }
}

/// Serde adapter for a required source identifier.
pub fn deserialize_source_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    source_id_from_json(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid source identifier: {value}")))
}

/// Serde adapter for an optional source identifier. Unusable values read as absent.
pub fn deserialize_opt_source_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(source_id_from_json))
}

fn keep<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if incoming.is_some() {
        slot.clone_from(incoming);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureUnitFields {
    pub name: String,
    pub abbreviation: String,
    pub unit_type: UnitType,
    pub conversion_factor: Option<f64>,
    pub is_base: Option<bool>,
}

impl MeasureUnitFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        self.abbreviation.clone_from(&incoming.abbreviation);
        self.unit_type = incoming.unit_type;
        keep(&mut self.conversion_factor, &incoming.conversion_factor);
        keep(&mut self.is_base, &incoming.is_base);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFields {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
}

impl CategoryFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        keep(&mut self.description, &incoming.description);
        keep(&mut self.parent_id, &incoming.parent_id);
    }
}

/// Shape shared by recipe categories and recipe families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFields {
    pub name: String,
    pub description: Option<String>,
}

impl GroupFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        keep(&mut self.description, &incoming.description);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SupplierFields {
    pub name: String,
    pub code: Option<String>,
    pub commercial_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub contact_person: Option<String>,
    pub web: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub province: Option<String>,
    pub country: Option<String>,
    pub tax_id: Option<String>,
    pub payment_terms: Option<String>,
    pub min_order: Option<f64>,
    pub discount: Option<f64>,
    pub delivery_days: Option<String>,
    pub notes: Option<String>,
    pub active: Option<bool>,
    pub category_name: Option<String>,
    pub subcategory_name: Option<String>,
}

impl SupplierFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        keep(&mut self.code, &incoming.code);
        keep(&mut self.commercial_name, &incoming.commercial_name);
        keep(&mut self.email, &incoming.email);
        keep(&mut self.phone, &incoming.phone);
        keep(&mut self.mobile, &incoming.mobile);
        keep(&mut self.contact_person, &incoming.contact_person);
        keep(&mut self.web, &incoming.web);
        keep(&mut self.address, &incoming.address);
        keep(&mut self.city, &incoming.city);
        keep(&mut self.postal_code, &incoming.postal_code);
        keep(&mut self.province, &incoming.province);
        keep(&mut self.country, &incoming.country);
        keep(&mut self.tax_id, &incoming.tax_id);
        keep(&mut self.payment_terms, &incoming.payment_terms);
        keep(&mut self.min_order, &incoming.min_order);
        keep(&mut self.discount, &incoming.discount);
        keep(&mut self.delivery_days, &incoming.delivery_days);
        keep(&mut self.notes, &incoming.notes);
        keep(&mut self.active, &incoming.active);
        keep(&mut self.category_name, &incoming.category_name);
        keep(&mut self.subcategory_name, &incoming.subcategory_name);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientFields {
    pub name: String,
    pub category_id: String,
    pub unit_id: String,
    pub supplier_id: Option<String>,
    pub cost: f64,
    pub tax_rate: Option<f64>,
    pub status: Option<IngredientStatus>,
    pub current_stock: Option<f64>,
    pub min_stock: Option<f64>,
    pub max_stock: Option<f64>,
    pub description: Option<String>,
}

impl IngredientFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        self.category_id.clone_from(&incoming.category_id);
        self.unit_id.clone_from(&incoming.unit_id);
        self.cost = incoming.cost;
        keep(&mut self.supplier_id, &incoming.supplier_id);
        keep(&mut self.tax_rate, &incoming.tax_rate);
        keep(&mut self.status, &incoming.status);
        keep(&mut self.current_stock, &incoming.current_stock);
        keep(&mut self.min_stock, &incoming.min_stock);
        keep(&mut self.max_stock, &incoming.max_stock);
        keep(&mut self.description, &incoming.description);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeFields {
    pub name: String,
    pub category_id: String,
    pub family_id: Option<String>,
    pub origin: Option<String>,
    pub status: RecipeStatus,
    pub description: Option<String>,
    pub theoretical_cost: Option<f64>,
    pub real_cost: Option<f64>,
    pub allergens: Vec<Allergen>,
    /// Target-native fields. Sync never sets them, so updates keep local edits.
    pub prep_time_min: Option<u32>,
    pub cook_time_min: Option<u32>,
    pub servings: Option<u32>,
}

impl RecipeFields {
    fn merge_from(&mut self, incoming: &Self) {
        self.name.clone_from(&incoming.name);
        self.category_id.clone_from(&incoming.category_id);
        self.status = incoming.status;
        self.allergens.clone_from(&incoming.allergens);
        keep(&mut self.family_id, &incoming.family_id);
        keep(&mut self.origin, &incoming.origin);
        keep(&mut self.description, &incoming.description);
        keep(&mut self.theoretical_cost, &incoming.theoretical_cost);
        keep(&mut self.real_cost, &incoming.real_cost);
        keep(&mut self.prep_time_min, &incoming.prep_time_min);
        keep(&mut self.cook_time_min, &incoming.cook_time_min);
        keep(&mut self.servings, &incoming.servings);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityFields {
    MeasureUnit(MeasureUnitFields),
    Category(CategoryFields),
    RecipeCategory(GroupFields),
    RecipeFamily(GroupFields),
    Supplier(SupplierFields),
    Ingredient(IngredientFields),
    Recipe(RecipeFields),
}

impl EntityFields {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::MeasureUnit(_) => EntityKind::MeasureUnit,
            Self::Category(_) => EntityKind::Category,
            Self::RecipeCategory(_) => EntityKind::RecipeCategory,
            Self::RecipeFamily(_) => EntityKind::RecipeFamily,
            Self::Supplier(_) => EntityKind::Supplier,
            Self::Ingredient(_) => EntityKind::Ingredient,
            Self::Recipe(_) => EntityKind::Recipe,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MeasureUnit(f) => &f.name,
            Self::Category(f) => &f.name,
            Self::RecipeCategory(f) | Self::RecipeFamily(f) => &f.name,
            Self::Supplier(f) => &f.name,
            Self::Ingredient(f) => &f.name,
            Self::Recipe(f) => &f.name,
        }
    }

    /// Apply an update: required fields are replaced, optional fields only
    /// when the incoming value is present. Returns `false` on a kind mismatch.
    pub fn merge_from(&mut self, incoming: &EntityFields) -> bool {
        match (self, incoming) {
            (Self::MeasureUnit(a), Self::MeasureUnit(b)) => a.merge_from(b),
            (Self::Category(a), Self::Category(b)) => a.merge_from(b),
            (Self::RecipeCategory(a), Self::RecipeCategory(b))
            | (Self::RecipeFamily(a), Self::RecipeFamily(b)) => a.merge_from(b),
            (Self::Supplier(a), Self::Supplier(b)) => a.merge_from(b),
            (Self::Ingredient(a), Self::Ingredient(b)) => a.merge_from(b),
            (Self::Recipe(a), Self::Recipe(b)) => a.merge_from(b),
            _ => return false,
        }
        true
    }
}

/// Mapper output: what to write for one upstream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePayload {
    pub source_id: String,
    pub fields: EntityFields,
}

impl WritePayload {
    pub fn new(source_id: impl Into<String>, fields: EntityFields) -> Self {
        Self {
            source_id: source_id.into(),
            fields,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.fields.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLineWrite {
    pub ingredient_id: String,
    pub unit_id: String,
    pub quantity: f64,
    pub position: u32,
}

/// Recipe loaded with its relations, as consumed by knowledge generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeView {
    pub id: String,
    pub name: String,
    pub category_name: String,
    pub family_name: Option<String>,
    pub description: Option<String>,
    pub prep_time_min: Option<u32>,
    pub cook_time_min: Option<u32>,
    pub servings: Option<u32>,
    pub allergens: Vec<Allergen>,
    pub lines: Vec<RecipeLineView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLineView {
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit_abbreviation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub title: String,
    pub content: String,
    pub section: String,
    pub source: String,
    pub language: String,
    pub content_hash: String,
}

impl KnowledgeDocument {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        section: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let content = content.into();
        let content_hash = content_hash(&title, &content);
        Self {
            title,
            content,
            section: section.into(),
            source: source.into(),
            language: "en".to_string(),
            content_hash,
        }
    }
}

/// Hex SHA-256 over the normalized `title||content` pair.
pub fn content_hash(title: &str, content: &str) -> String {
    let normalized = format!(
        "{}||{}",
        title.trim().to_lowercase(),
        content.trim().to_lowercase()
    );
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_ids_collapse_to_the_same_key() {
        assert_eq!(source_id_from_json(&json!(101)), Some("101".to_string()));
        assert_eq!(source_id_from_json(&json!("101")), Some("101".to_string()));
        assert_eq!(source_id_from_json(&json!(" 7 ")), Some("7".to_string()));
        assert_eq!(source_id_from_json(&json!(7.0)), Some("7".to_string()));
        assert_eq!(source_id_from_json(&json!("")), None);
        assert_eq!(source_id_from_json(&json!(null)), None);
        assert_eq!(source_id_from_json(&json!({"id": 1})), None);
    }

    #[test]
    fn allergen_codes_are_case_and_whitespace_tolerant() {
        assert_eq!(Allergen::from_code(" gluten "), Some(Allergen::Gluten));
        assert_eq!(Allergen::from_code("FRUTOS_SECOS"), Some(Allergen::TreeNuts));
        assert_eq!(Allergen::from_code("KIWI"), None);
        for allergen in Allergen::ALL {
            assert_eq!(Allergen::from_code(allergen.code()), Some(allergen));
        }
    }

    #[test]
    fn merge_keeps_existing_optional_values_when_incoming_is_absent() {
        let mut stored = EntityFields::Supplier(SupplierFields {
            name: "Old".into(),
            email: Some("old@example.com".into()),
            phone: Some("555".into()),
            ..Default::default()
        });
        let incoming = EntityFields::Supplier(SupplierFields {
            name: "New".into(),
            email: Some("new@example.com".into()),
            ..Default::default()
        });

        assert!(stored.merge_from(&incoming));
        let EntityFields::Supplier(merged) = stored else {
            panic!("kind changed");
        };
        assert_eq!(merged.name, "New");
        assert_eq!(merged.email.as_deref(), Some("new@example.com"));
        assert_eq!(merged.phone.as_deref(), Some("555"));
    }

    #[test]
    fn merge_rejects_kind_mismatch() {
        let mut unit = EntityFields::RecipeFamily(GroupFields {
            name: "Family".into(),
            description: None,
        });
        let category = EntityFields::RecipeCategory(GroupFields {
            name: "Category".into(),
            description: None,
        });
        assert!(!unit.merge_from(&category));
    }

    #[test]
    fn content_hash_ignores_case_and_outer_whitespace() {
        assert_eq!(content_hash("Recipe: Soup", "Hot."), content_hash(" recipe: soup ", "HOT."));
        assert_ne!(content_hash("Recipe: Soup", "Hot."), content_hash("Recipe: Soup", "Cold."));
        assert_eq!(content_hash("a", "b").len(), 64);
    }
}
