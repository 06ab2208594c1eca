//! Knowledge document generation from synchronized recipes.

use std::collections::HashMap;

use rcs_core::{Allergen, KnowledgeDocument, RecipeView, KNOWLEDGE_SOURCE};
use rcs_storage::{RetrievalIndex, StoreResult};
use tracing::info;

pub const RECIPES_SECTION: &str = "Recipes";
pub const ALLERGENS_SECTION: &str = "Allergens";

const DISCLAIMER: &str = "Note: this classification is inferred from the registered ingredients \
and may be incomplete. Staff must always confirm allergens with the kitchen before serving.";

fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        format!("{quantity}")
    }
}

fn ingredient_list(recipe: &RecipeView) -> String {
    if recipe.lines.is_empty() {
        return "no ingredients registered".to_string();
    }
    recipe
        .lines
        .iter()
        .map(|l| {
            format!(
                "{} ({}{})",
                l.ingredient_name,
                format_quantity(l.quantity),
                l.unit_abbreviation
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn ingredient_names(recipe: &RecipeView) -> String {
    if recipe.lines.is_empty() {
        return "no ingredients registered".to_string();
    }
    recipe
        .lines
        .iter()
        .map(|l| l.ingredient_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn allergen_labels(allergens: &[Allergen]) -> String {
    allergens
        .iter()
        .map(|a| a.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Title label per recipe, in input order. Names shared by several recipes
/// get the recipe id appended, since documents are keyed by title.
pub fn title_labels(recipes: &[RecipeView]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for recipe in recipes {
        *seen.entry(recipe.name.as_str()).or_default() += 1;
    }
    recipes
        .iter()
        .map(|r| match seen.get(r.name.as_str()) {
            Some(n) if *n > 1 => format!("{} [{}]", r.name, r.id),
            _ => r.name.clone(),
        })
        .collect()
}

pub fn recipe_document(recipe: &RecipeView, label: &str) -> KnowledgeDocument {
    let mut parts = Vec::new();
    match &recipe.family_name {
        Some(family) => parts.push(format!(
            "Dish in the {} category · Family: {family}.",
            recipe.category_name
        )),
        None => parts.push(format!("Dish in the {} category.", recipe.category_name)),
    }
    if let Some(description) = recipe.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(description.trim().to_string());
    }
    parts.push(format!("Ingredients: {}.", ingredient_list(recipe)));
    if let Some(minutes) = recipe.prep_time_min.filter(|m| *m > 0) {
        parts.push(format!("Preparation time: {minutes} min."));
    }
    if let Some(minutes) = recipe.cook_time_min.filter(|m| *m > 0) {
        parts.push(format!("Cooking time: {minutes} min."));
    }
    if let Some(servings) = recipe.servings.filter(|s| *s > 0) {
        parts.push(format!("Servings: {servings}."));
    }
    let allergens = if recipe.allergens.is_empty() {
        "none declared".to_string()
    } else {
        allergen_labels(&recipe.allergens)
    };
    parts.push(format!("Allergens: {allergens}."));

    KnowledgeDocument::new(
        format!("Recipe: {label}"),
        parts.join(" "),
        RECIPES_SECTION,
        KNOWLEDGE_SOURCE,
    )
}

pub fn allergen_document(recipe: &RecipeView, label: &str) -> KnowledgeDocument {
    let content = if recipe.allergens.is_empty() {
        format!(
            "{} has none declared of the 14 mandatory-declaration allergens. Ingredients: {}.",
            recipe.name,
            ingredient_names(recipe)
        )
    } else {
        format!(
            "{} contains the following allergens: {}. Full ingredients: {}.",
            recipe.name,
            allergen_labels(&recipe.allergens),
            ingredient_names(recipe)
        )
    };
    KnowledgeDocument::new(
        format!("Allergens: {label}"),
        content,
        ALLERGENS_SECTION,
        KNOWLEDGE_SOURCE,
    )
}

/// Two index documents per allergen, emitted even when a list is empty.
pub fn allergen_index_documents(recipes: &[RecipeView]) -> Vec<KnowledgeDocument> {
    let mut docs = Vec::with_capacity(Allergen::ALL.len() * 2);
    for allergen in Allergen::ALL {
        let label = allergen.label();
        let (with, without): (Vec<&RecipeView>, Vec<&RecipeView>) =
            recipes.iter().partition(|r| r.allergens.contains(&allergen));
        let names = |list: &[&RecipeView]| {
            list.iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let content = if with.is_empty() {
            format!("No dishes currently contain {}. {DISCLAIMER}", label.to_uppercase())
        } else {
            format!(
                "The following dishes contain {}: {}. {DISCLAIMER}",
                label.to_uppercase(),
                names(with.as_slice())
            )
        };
        docs.push(KnowledgeDocument::new(
            format!("Dishes containing {label}"),
            content,
            ALLERGENS_SECTION,
            KNOWLEDGE_SOURCE,
        ));

        let content = if without.is_empty() {
            format!("Every dish contains {}. {DISCLAIMER}", label.to_uppercase())
        } else {
            format!(
                "The following dishes do not contain {}: {}. {DISCLAIMER}",
                label.to_uppercase(),
                names(without.as_slice())
            )
        };
        docs.push(KnowledgeDocument::new(
            format!("Dishes without {label}"),
            content,
            ALLERGENS_SECTION,
            KNOWLEDGE_SOURCE,
        ));
    }
    docs
}

/// Full document set for the given recipes; empty input yields nothing.
pub fn generate_documents(recipes: &[RecipeView]) -> Vec<KnowledgeDocument> {
    if recipes.is_empty() {
        return Vec::new();
    }
    let mut docs: Vec<KnowledgeDocument> = recipes
        .iter()
        .zip(title_labels(recipes))
        .flat_map(|(r, label)| [recipe_document(r, &label), allergen_document(r, &label)])
        .collect();
    docs.extend(allergen_index_documents(recipes));
    docs
}

/// By-source replace: drop everything previously published under the
/// knowledge source label, then insert `docs`. Returns the rows stored.
pub async fn publish(index: &dyn RetrievalIndex, docs: &[KnowledgeDocument]) -> StoreResult<usize> {
    let removed = index.delete_documents_by_source(KNOWLEDGE_SOURCE).await?;
    let inserted = index.bulk_upsert_documents(docs).await?;
    info!(removed, inserted, source = KNOWLEDGE_SOURCE, "knowledge documents republished");
    Ok(inserted)
}
