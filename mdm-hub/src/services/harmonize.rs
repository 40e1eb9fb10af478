//! Code and unit harmonization
//!
//! Rewrites coded values to one vocabulary: state names to UF codes,
//! country names to ISO alpha-2, unit-of-measure synonyms to canonical
//! symbols. Every rewrite is reported.

use crate::normalizer::rules::{country_code, state_code};
use crate::utils::text::comparison_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const UNIT_SYNONYMS: &[(&str, &[&str])] = &[
    ("kg", &["kg", "kgs", "kilo", "kilos", "quilo", "quilos", "quilograma", "quilogramas", "kilogram", "kilograms"]),
    ("g", &["g", "gr", "grs", "grama", "gramas", "gram", "grams"]),
    ("L", &["l", "lt", "lts", "litro", "litros", "liter", "liters", "litre", "litres"]),
    ("mL", &["ml", "mililitro", "mililitros", "milliliter", "milliliters"]),
    ("m", &["m", "mt", "mts", "metro", "metros", "meter", "meters"]),
    ("cm", &["cm", "centimetro", "centimetros", "centimeter", "centimeters"]),
    ("un", &["un", "und", "unid", "unidade", "unidades", "unit", "units", "pc", "pcs", "peca", "pecas"]),
    ("cx", &["cx", "caixa", "caixas", "box", "boxes"]),
];

/// Who a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Subject {
    GoldenRecord(usize),
    Record(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizationChange {
    pub subject: Subject,
    pub field: String,
    pub from: String,
    pub to: String,
}

/// Harmonization output: code rewrites and unit rewrites
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonizationReport {
    pub codes: Vec<HarmonizationChange>,
    pub units: Vec<HarmonizationChange>,
}

impl HarmonizationReport {
    pub fn len(&self) -> usize {
        self.codes.len() + self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical unit symbol for a synonym
pub fn canonical_unit(raw: &str) -> Option<&'static str> {
    let key = comparison_key(raw);
    UNIT_SYNONYMS
        .iter()
        .find(|(_, synonyms)| synonyms.contains(&key.as_str()))
        .map(|(canonical, _)| *canonical)
}

fn is_unit_field(field: &str) -> bool {
    field == "unit" || field == "uom" || field.ends_with("_unit")
}

/// Harmonize one field map in place, appending changes to `report`
pub fn harmonize_fields(subject: Subject, fields: &mut BTreeMap<String, Option<String>>, report: &mut HarmonizationReport) {
    for (field, value) in fields.iter_mut() {
        let Some(current) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };

        let (replacement, is_unit) = match field.as_str() {
            "state" => (state_code(current).map(str::to_string), false),
            "country_code" | "country" => (country_code(current), false),
            f if is_unit_field(f) => (canonical_unit(current).map(str::to_string), true),
            _ => (None, false),
        };

        let Some(replacement) = replacement.filter(|r| r.as_str() != current) else {
            continue;
        };
        let change = HarmonizationChange {
            subject,
            field: field.clone(),
            from: current.to_string(),
            to: replacement.clone(),
        };
        if is_unit {
            report.units.push(change);
        } else {
            report.codes.push(change);
        }
        *value = Some(replacement);
    }
}
