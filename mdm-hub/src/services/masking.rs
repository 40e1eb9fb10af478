//! PII masking
//!
//! Produces masked renditions and SHA-256 pseudonym tokens for personal
//! identifiers. Records themselves are never modified.

use crate::models::NormalizedRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Fields treated as personal data
pub const PII_FIELDS: &[&str] = &["cpf", "cnpj", "email", "phone", "birth_date"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedValue {
    pub masked: String,
    /// Hex SHA-256 of `field:value`; equal values give equal tokens
    pub token: String,
}

/// Masks for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMask {
    pub index: usize,
    pub fields: BTreeMap<String, MaskedValue>,
}

/// Replace every ASCII digit outside `keep` (char positions) with `*`
fn mask_digits_outside(value: &str, keep: impl Fn(usize) -> bool) -> String {
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if c.is_ascii_digit() && !keep(i) { '*' } else { c })
        .collect()
}

/// Masked rendition of one field value
pub fn mask_value(field: &str, value: &str) -> String {
    let len = value.chars().count();
    match field {
        // ***.456.789-**
        "cpf" => mask_digits_outside(value, |i| (4..11).contains(&i)),
        // 11.***.***/0001-**
        "cnpj" => mask_digits_outside(value, |i| i < 2 || (11..15).contains(&i)),
        "email" => match value.split_once('@') {
            Some((local, domain)) => {
                let first: String = local.chars().take(1).collect();
                format!("{}***@{}", first, domain)
            }
            None => "*".repeat(len),
        },
        // country code + area code and last 4 digits stay visible
        "phone" => mask_digits_outside(value, |i| i < 5 || i + 4 >= len),
        // year only
        "birth_date" => mask_digits_outside(value, |i| i < 4),
        _ => "*".repeat(len),
    }
}

pub fn pseudonym_token(field: &str, value: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", field, value).as_bytes());
    format!("{:x}", digest)
}

/// Masks for a record; `None` when it carries no personal data
pub fn mask_record(record: &NormalizedRecord) -> Option<PiiMask> {
    let fields: BTreeMap<String, MaskedValue> = PII_FIELDS
        .iter()
        .filter_map(|field| {
            let value = record.get(field)?;
            Some((
                field.to_string(),
                MaskedValue {
                    masked: mask_value(field, value),
                    token: pseudonym_token(field, value),
                },
            ))
        })
        .collect();

    (!fields.is_empty()).then(|| PiiMask {
        index: record.index,
        fields,
    })
}
