use std::collections::{BTreeMap, HashMap};

use rcs_core::EntityKind;

/// Per-run map from source identifier to target identifier, one table per kind.
///
/// Rebuilt from scratch on every run. In dry-run mode phases record
/// `source_id -> source_id` placeholders so downstream mappers still resolve.
#[derive(Debug, Clone, Default)]
pub struct IdentifierRegistry {
    maps: BTreeMap<EntityKind, HashMap<String, String>>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EntityKind, source_id: impl Into<String>, target_id: impl Into<String>) {
        self.maps
            .entry(kind)
            .or_default()
            .insert(source_id.into(), target_id.into());
    }

    pub fn resolve(&self, kind: EntityKind, source_id: &str) -> Option<&str> {
        self.maps
            .get(&kind)
            .and_then(|m| m.get(source_id))
            .map(String::as_str)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.maps.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(HashMap::is_empty)
    }

    pub fn measure_unit(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::MeasureUnit, source_id)
    }

    pub fn category(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::Category, source_id)
    }

    pub fn recipe_category(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::RecipeCategory, source_id)
    }

    pub fn recipe_family(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::RecipeFamily, source_id)
    }

    pub fn supplier(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::Supplier, source_id)
    }

    pub fn ingredient(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::Ingredient, source_id)
    }

    pub fn recipe(&self, source_id: &str) -> Option<&str> {
        self.resolve(EntityKind::Recipe, source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_do_not_share_keys() {
        let mut registry = IdentifierRegistry::new();
        registry.record(EntityKind::Category, "3", "cat-uuid");
        registry.record(EntityKind::RecipeCategory, "3", "rcat-uuid");

        assert_eq!(registry.category("3"), Some("cat-uuid"));
        assert_eq!(registry.recipe_category("3"), Some("rcat-uuid"));
        assert_eq!(registry.measure_unit("3"), None);
        assert_eq!(registry.len(EntityKind::Category), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn later_records_replace_earlier_ones() {
        let mut registry = IdentifierRegistry::new();
        registry.record(EntityKind::Ingredient, "101", "101");
        registry.record(EntityKind::Ingredient, "101", "real-id");
        assert_eq!(registry.ingredient("101"), Some("real-id"));
    }
}
