//! Upstream record shapes. Field names follow the API's camelCase.
//!
//! Identifiers may arrive as numbers or strings and are normalized to strings
//! on decode. Unknown fields are ignored.

use rcs_core::{deserialize_opt_source_id, deserialize_source_id};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Decode one raw record into its typed shape.
pub fn decode<T: DeserializeOwned>(value: &JsonValue) -> Result<T, serde_json::Error> {
    T::deserialize(value)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeasureUnit {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
    pub name: String,
    pub abbreviation: Option<String>,
    pub abbr: Option<String>,
    pub symbol: Option<String>,
    pub short_name: Option<String>,
    #[serde(rename = "type")]
    pub unit_type: Option<String>,
    pub conversion_factor: Option<f64>,
    pub is_base: Option<bool>,
}

impl SourceMeasureUnit {
    /// First of `abbreviation`, `abbr`, `symbol`, `shortName`, else the name, trimmed.
    pub fn abbreviation(&self) -> String {
        [&self.abbreviation, &self.abbr, &self.symbol, &self.short_name]
            .into_iter()
            .flatten()
            .next()
            .unwrap_or(&self.name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCategory {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub parent_id: Option<String>,
}

/// Recipe categories and recipe families share this shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceGroup {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSupplier {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
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

/// A purchasable product; becomes an Ingredient.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProduct {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub supplier_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub measure_unit_id: Option<String>,
    pub cost_price: Option<f64>,
    pub tax_rate: Option<f64>,
    pub status: Option<String>,
    pub current_stock: Option<f64>,
    pub min_stock: Option<f64>,
    pub max_stock: Option<f64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecipeLine {
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub product_id: Option<String>,
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub measure_unit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecipe {
    #[serde(deserialize_with = "deserialize_source_id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_source_id")]
    pub family_id: Option<String>,
    pub theoretical_cost: Option<f64>,
    pub real_cost: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<SourceRecipeLine>,
}
