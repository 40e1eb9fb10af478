//! Model-output handling for the ModelBacked strategy
//!
//! The model proposes values; the formatting rules decide. A proposed value
//! that does not come out of the rules in canonical shape is replaced by the
//! rule rendering of the raw input.

use super::rules::{self, format_field, is_canonical};
use crate::utils::value_as_string;
use mdm_common::{ParsedAddress, RawRecord};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Component keys the address prompt asks for
pub const ADDRESS_KEYS: [&str; 8] = [
    "thoroughfare",
    "house_number",
    "neighborhood",
    "city",
    "state",
    "postal_code",
    "country_code",
    "complement",
];

/// Model fields merged over the raw record
#[derive(Debug, Default)]
pub struct MergedFields {
    pub fields: BTreeMap<String, Option<String>>,
    /// Fields where the model's value was replaced by the rules
    pub overridden: Vec<String>,
}

/// Record as sent to the model: email pre-lowered to reduce ambiguity
pub fn prepare_for_prompt(raw: &RawRecord) -> RawRecord {
    let mut prepared = raw.clone();
    if let Some(Some(email)) = prepared.fields.get_mut("email") {
        *email = rules::format_email(email);
    }
    prepared
}

/// Merge the model's answer over the raw record's fields.
///
/// Only fields present in the raw record are kept; a blank raw value stays
/// absent whatever the model says.
pub fn merge_model_fields(raw: &RawRecord, answer: &Map<String, Value>) -> MergedFields {
    let country = value_as_string(answer.get("country_code"))
        .map(|c| rules::format_country(&c))
        .or_else(|| rules::record_country(raw));

    let mut merged = MergedFields::default();
    for field in raw.fields.keys() {
        let Some(raw_value) = raw.get(field) else {
            merged.fields.insert(field.clone(), None);
            continue;
        };

        let from_rules = || format_field(field, raw_value, country.as_deref());
        let value = match value_as_string(answer.get(field.as_str())) {
            Some(proposed) => {
                let formatted = format_field(field, &proposed, country.as_deref());
                if is_canonical(field, &formatted) {
                    formatted
                } else {
                    merged.overridden.push(field.clone());
                    from_rules()
                }
            }
            None => from_rules(),
        };
        merged.fields.insert(field.clone(), Some(value).filter(|v| !v.is_empty()));
    }
    merged
}

/// Address components from the model's answer, canonicalized.
/// `None` when the answer carries no usable component.
pub fn parsed_from_model(answer: &Map<String, Value>) -> Option<ParsedAddress> {
    let component = |key: &str| value_as_string(answer.get(key));
    let parsed = rules::canonicalize_address(ParsedAddress {
        thoroughfare: component("thoroughfare"),
        house_number: component("house_number"),
        neighborhood: component("neighborhood"),
        city: component("city"),
        state: component("state"),
        postal_code: component("postal_code"),
        country_code: component("country_code"),
        complement: component("complement"),
    });
    (!parsed.is_empty()).then_some(parsed)
}

/// Record fields (already normalized) fill components the model left empty
pub fn fill_from_fields(mut parsed: ParsedAddress, fields: &BTreeMap<String, Option<String>>) -> ParsedAddress {
    if let Some(from_rules) = rules::parse_address(fields) {
        parsed.thoroughfare = parsed.thoroughfare.or(from_rules.thoroughfare);
        parsed.house_number = parsed.house_number.or(from_rules.house_number);
        parsed.neighborhood = parsed.neighborhood.or(from_rules.neighborhood);
        parsed.city = parsed.city.or(from_rules.city);
        parsed.state = parsed.state.or(from_rules.state);
        parsed.postal_code = parsed.postal_code.or(from_rules.postal_code);
        parsed.country_code = parsed.country_code.or(from_rules.country_code);
        parsed.complement = parsed.complement.or(from_rules.complement);
    }
    parsed
}

/// True when the record has anything worth sending to the address class
pub fn has_address_data(fields: &BTreeMap<String, Option<String>>) -> bool {
    ["address", "cep"]
        .iter()
        .any(|f| fields.get(*f).and_then(|v| v.as_deref()).map_or(false, |v| !v.trim().is_empty()))
}
