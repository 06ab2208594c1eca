//! Pure source-to-target mappers.
//!
//! Each returns `None` when the record cannot be written: a blank name or an
//! unresolvable required reference. The orchestrator counts that as skipped.
//! Optional fields are copied only when present upstream, so an update never
//! blanks a stored value.

use std::collections::HashMap;

use rcs_core::{
    Allergen, CategoryFields, EntityFields, GroupFields, IngredientFields, IngredientStatus,
    MeasureUnitFields, RecipeFields, RecipeLineWrite, RecipeStatus, SupplierFields, UnitType,
    WritePayload, RECIPE_ORIGIN,
};
use rcs_source::records::{
    SourceCategory, SourceGroup, SourceMeasureUnit, SourceProduct, SourceRecipe, SourceSupplier,
};

use crate::registry::IdentifierRegistry;

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_deref().and_then(non_blank)
}

pub fn map_measure_unit(raw: &SourceMeasureUnit) -> Option<WritePayload> {
    let name = non_blank(&raw.name)?;
    let abbreviation = raw.abbreviation();
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::MeasureUnit(MeasureUnitFields {
            abbreviation: if abbreviation.is_empty() { name.clone() } else { abbreviation },
            name,
            unit_type: raw
                .unit_type
                .as_deref()
                .and_then(UnitType::from_code)
                .unwrap_or_default(),
            conversion_factor: raw.conversion_factor,
            is_base: raw.is_base,
        }),
    ))
}

/// Parent is set only if already resolved in this run; see the deferred
/// linking pass in the category phase.
pub fn map_category(raw: &SourceCategory, registry: &IdentifierRegistry) -> Option<WritePayload> {
    let parent_id = raw
        .parent_id
        .as_deref()
        .and_then(|pid| registry.category(pid))
        .map(str::to_string);
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::Category(CategoryFields {
            name: non_blank(&raw.name)?,
            description: present(&raw.description),
            parent_id,
        }),
    ))
}

fn group_fields(raw: &SourceGroup) -> Option<GroupFields> {
    Some(GroupFields {
        name: non_blank(&raw.name)?,
        description: present(&raw.description),
    })
}

pub fn map_recipe_category(raw: &SourceGroup) -> Option<WritePayload> {
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::RecipeCategory(group_fields(raw)?),
    ))
}

pub fn map_recipe_family(raw: &SourceGroup) -> Option<WritePayload> {
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::RecipeFamily(group_fields(raw)?),
    ))
}

pub fn map_supplier(raw: &SourceSupplier) -> Option<WritePayload> {
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::Supplier(SupplierFields {
            name: non_blank(&raw.name)?,
            code: present(&raw.code),
            commercial_name: present(&raw.commercial_name),
            email: present(&raw.email),
            phone: present(&raw.phone),
            mobile: present(&raw.mobile),
            contact_person: present(&raw.contact_person),
            web: present(&raw.web),
            address: present(&raw.address),
            city: present(&raw.city),
            postal_code: present(&raw.postal_code),
            province: present(&raw.province),
            country: present(&raw.country),
            tax_id: present(&raw.tax_id),
            payment_terms: present(&raw.payment_terms),
            min_order: raw.min_order,
            discount: raw.discount,
            delivery_days: present(&raw.delivery_days),
            notes: present(&raw.notes),
            active: raw.active,
            category_name: present(&raw.category_name),
            subcategory_name: present(&raw.subcategory_name),
        }),
    ))
}

/// Requires a resolvable category and measure unit; the supplier is optional.
pub fn map_ingredient(raw: &SourceProduct, registry: &IdentifierRegistry) -> Option<WritePayload> {
    let category_id = registry.category(raw.category_id.as_deref()?)?.to_string();
    let unit_id = registry.measure_unit(raw.measure_unit_id.as_deref()?)?.to_string();
    let supplier_id = raw
        .supplier_id
        .as_deref()
        .and_then(|sid| registry.supplier(sid))
        .map(str::to_string);
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::Ingredient(IngredientFields {
            name: non_blank(&raw.name)?,
            category_id,
            unit_id,
            supplier_id,
            cost: raw.cost_price.unwrap_or(0.0),
            tax_rate: raw.tax_rate,
            status: raw.status.as_deref().and_then(IngredientStatus::from_code),
            current_stock: raw.current_stock,
            min_stock: raw.min_stock,
            max_stock: raw.max_stock,
            description: present(&raw.description),
        }),
    ))
}

/// Explicit allergen codes outside the known vocabulary are dropped.
pub fn parse_allergens(codes: &[String]) -> Vec<Allergen> {
    let mut out = Vec::new();
    for allergen in codes.iter().filter_map(|c| Allergen::from_code(c)) {
        if !out.contains(&allergen) {
            out.push(allergen);
        }
    }
    out
}

/// Requires a resolvable recipe category. Allergens carry only the explicit
/// upstream codes; inference is merged in by the orchestrator.
pub fn map_recipe(raw: &SourceRecipe, registry: &IdentifierRegistry) -> Option<WritePayload> {
    let category_id = registry.recipe_category(raw.category_id.as_deref()?)?.to_string();
    let family_id = raw
        .family_id
        .as_deref()
        .and_then(|fid| registry.recipe_family(fid))
        .map(str::to_string);
    Some(WritePayload::new(
        raw.id.clone(),
        EntityFields::Recipe(RecipeFields {
            name: non_blank(&raw.name)?,
            category_id,
            family_id,
            origin: Some(RECIPE_ORIGIN.to_string()),
            status: RecipeStatus::Active,
            description: present(&raw.description),
            theoretical_cost: raw.theoretical_cost,
            real_cost: raw.real_cost,
            allergens: parse_allergens(&raw.allergens),
            prep_time_min: None,
            cook_time_min: None,
            servings: None,
        }),
    ))
}

/// Resolvable composition lines. Position is the index in the upstream list,
/// so dropped lines leave gaps.
pub fn map_recipe_lines(raw: &SourceRecipe, registry: &IdentifierRegistry) -> Vec<RecipeLineWrite> {
    raw.ingredients
        .iter()
        .enumerate()
        .filter_map(|(index, line)| {
            let ingredient_id = registry.ingredient(line.product_id.as_deref()?)?;
            let unit_id = registry.measure_unit(line.measure_unit_id.as_deref()?)?;
            Some(RecipeLineWrite {
                ingredient_id: ingredient_id.to_string(),
                unit_id: unit_id.to_string(),
                quantity: line.quantity.unwrap_or(1.0),
                position: u32::try_from(index).ok()?,
            })
        })
        .collect()
}

/// Names of the products referenced by the recipe, for allergen inference.
pub fn recipe_ingredient_names<'a>(
    raw: &SourceRecipe,
    names: &'a HashMap<String, String>,
) -> Vec<&'a str> {
    raw.ingredients
        .iter()
        .filter_map(|line| names.get(line.product_id.as_deref()?))
        .map(String::as_str)
        .filter(|name| !name.trim().is_empty())
        .collect()
}
