//! Keyword-based allergen inference over ingredient names.
//!
//! Matching is a plain substring test on normalized text, so false positives
//! are expected ("panceta" contains "pan", "romero" contains "mero").
//! Inference only ever adds to what the source declared.

use std::collections::BTreeSet;

use rcs_core::Allergen;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, diacritic-free keyword fragments per allergen.
pub fn keywords(allergen: Allergen) -> &'static [&'static str] {
    match allergen {
        Allergen::Gluten => &[
            "trigo", "harina", "pan", "centeno", "cebada", "avena", "espelta", "semola", "cuscus",
            "pasta", "galleta", "croissant", "hojaldre", "bizcocho", "empanado",
        ],
        Allergen::Crustaceans => &[
            "gamba", "langostino", "cangrejo", "bogavante", "cigala", "camaron", "necora",
            "percebes", "langosta", "buey de mar",
        ],
        Allergen::Eggs => &["huevo", "yema", "clara", "mayonesa", "merengue", "tortilla", "rebozado"],
        Allergen::Fish => &[
            "salmon", "bacalao", "merluza", "atun", "anchoa", "sardina", "lubina", "dorada", "rape",
            "lenguado", "boqueron", "bonito", "caballa", "rodaballo", "halibut", "trucha",
            "pez espada", "mero", "san pedro",
        ],
        Allergen::Peanuts => &["cacahuete", "mani", "peanut"],
        Allergen::Soy => &["soja", "tofu", "edamame", "tamari", "miso", "tempeh"],
        Allergen::Dairy => &[
            "leche", "nata", "queso", "mantequilla", "yogur", "crema", "suero", "requeson",
            "mascarpone", "mozzarella", "parmesano", "ricotta", "brie", "camembert", "gruyere",
            "gorgonzola",
        ],
        Allergen::TreeNuts => &[
            "almendra", "nuez", "avellana", "pistacho", "anacardo", "pinon", "macadamia", "pecan",
            "caju",
        ],
        Allergen::Celery => &["apio"],
        Allergen::Mustard => &["mostaza"],
        Allergen::Sesame => &["sesamo", "tahini"],
        Allergen::Sulphites => &["sulfito", "vino", "vinagre", "mosto"],
        Allergen::Lupin => &["altramuz", "altramuces", "lupino", "lupina"],
        Allergen::Molluscs => &[
            "mejillon", "calamar", "pulpo", "sepia", "ostra", "almeja", "berberecho", "vieira",
            "navaja", "chipiron", "caracol",
        ],
    }
}

/// Trim, lowercase, decompose and drop combining marks.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Every allergen with at least one keyword inside `name`, in vocabulary order.
pub fn infer_from_name(name: &str) -> Vec<Allergen> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return Vec::new();
    }
    Allergen::ALL
        .into_iter()
        .filter(|a| keywords(*a).iter().any(|kw| normalized.contains(kw)))
        .collect()
}

/// Deduplicated union of [`infer_from_name`] over all names.
pub fn infer_for_recipe<S: AsRef<str>>(names: &[S]) -> Vec<Allergen> {
    names
        .iter()
        .flat_map(|n| infer_from_name(n.as_ref()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Set union that keeps explicit values first, in their given order.
pub fn merge(explicit: &[Allergen], inferred: &[Allergen]) -> Vec<Allergen> {
    let mut merged: Vec<Allergen> = Vec::with_capacity(explicit.len() + inferred.len());
    for allergen in explicit.iter().chain(inferred) {
        if !merged.contains(allergen) {
            merged.push(*allergen);
        }
    }
    merged
}
