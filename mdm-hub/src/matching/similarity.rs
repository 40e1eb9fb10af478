//! Similarity Engine
//!
//! Weighted multi-field comparator over normalized records.
//!
//! | field      | method                                              |
//! |------------|-----------------------------------------------------|
//! | identifier | exact match of CPF/CNPJ digits, weight boosted on match |
//! | name       | max(token-set ratio, Jaro-Winkler) on comparison keys |
//! | phone      | exact 1.0, same last 8 digits 0.8, else 0.0         |
//! | email      | exact 1.0, else normalized Levenshtein              |
//! | address    | token-set ratio after abbreviation expansion        |
//! | postal     | exact match of digits                               |
//!
//! A field absent on either side is left out of the weighted average.
//! Every string comparison sees its operands in a fixed order, so
//! `score(a, b)` and `score(b, a)` are computed from identical inputs.

use crate::config::{FieldWeights, MatchingConfig};
use crate::models::NormalizedRecord;
use crate::utils::text::{comparison_key, digits};
use std::collections::BTreeSet;

/// Digits compared for the phone "same subscriber" partial match
const PHONE_SUFFIX_DIGITS: usize = 8;
const PHONE_SUFFIX_SCORE: f64 = 0.8;

/// Address abbreviations expanded before comparison; `None` drops the token
const ADDRESS_TOKENS: &[(&str, Option<&str>)] = &[
    ("r", Some("rua")),
    ("av", Some("avenida")),
    ("al", Some("alameda")),
    ("tv", Some("travessa")),
    ("trav", Some("travessa")),
    ("pc", Some("praca")),
    ("pca", Some("praca")),
    ("rod", Some("rodovia")),
    ("estr", Some("estrada")),
    ("ap", Some("apartamento")),
    ("apt", Some("apartamento")),
    ("apto", Some("apartamento")),
    ("bl", Some("bloco")),
    ("n", None),
    ("no", None),
    ("nº", None),
    ("num", None),
    ("numero", None),
];

/// Record fields reduced to what the comparator looks at.
///
/// Built once per record before pairwise scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparableRecord {
    pub index: usize,
    pub cpf: Option<String>,
    pub cnpj: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
}

impl ComparableRecord {
    pub fn from_record(record: &NormalizedRecord) -> Self {
        let parsed = record.parsed.as_ref();
        let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());

        let address = record.get("address").map(str::to_string).or_else(|| {
            let parsed = parsed?;
            let parts: Vec<&str> = [&parsed.thoroughfare, &parsed.house_number]
                .iter()
                .filter_map(|v| v.as_deref())
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });
        let postal_code = record
            .get("cep")
            .or_else(|| parsed.and_then(|p| p.postal_code.as_deref()))
            .map(digits);

        Self {
            index: record.index,
            cpf: record.get("cpf").map(digits).and_then(non_empty),
            cnpj: record.get("cnpj").map(digits).and_then(non_empty),
            name: record.get("name").map(comparison_key).and_then(non_empty),
            phone: record.get("phone").map(digits).and_then(non_empty),
            email: record.get("email").map(|e| e.trim().to_lowercase()).and_then(non_empty),
            address: address.map(|a| address_key(&a)).and_then(non_empty),
            postal_code: postal_code.and_then(non_empty),
        }
    }
}

/// Comparison key of an address with abbreviations expanded
pub fn address_key(address: &str) -> String {
    comparison_key(address)
        .split(' ')
        .filter_map(|token| match ADDRESS_TOKENS.iter().find(|(abbr, _)| *abbr == token) {
            Some((_, expansion)) => *expansion,
            None => Some(token),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Operands in a fixed order
fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Token-set ratio in `[0,1]`: compares the shared tokens against each
/// side's full token set, so word order and extra words matter less.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let (a, b) = ordered(a, b);
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let join = |tokens: Vec<&str>| tokens.join(" ");
    let intersection = join(tokens_a.intersection(&tokens_b).copied().collect());
    let only_a = join(tokens_a.difference(&tokens_b).copied().collect());
    let only_b = join(tokens_b.difference(&tokens_a).copied().collect());

    let combine = |rest: &str| match (intersection.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => intersection.clone(),
        (false, false) => format!("{} {}", intersection, rest),
    };
    let combined_a = combine(&only_a);
    let combined_b = combine(&only_b);

    let mut best = strsim::normalized_levenshtein(&combined_a, &combined_b);
    if !intersection.is_empty() {
        best = best
            .max(strsim::normalized_levenshtein(&intersection, &combined_a))
            .max(strsim::normalized_levenshtein(&intersection, &combined_b));
    }
    best
}

fn name_score(a: &str, b: &str) -> f64 {
    let (a, b) = ordered(a, b);
    token_set_ratio(a, b).max(strsim::jaro_winkler(a, b))
}

fn identifier_score(a: &ComparableRecord, b: &ComparableRecord) -> Option<f64> {
    let pairs = [(&a.cpf, &b.cpf), (&a.cnpj, &b.cnpj)];
    let compared: Vec<bool> = pairs
        .iter()
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(x == y),
            _ => None,
        })
        .collect();
    if compared.is_empty() {
        return None;
    }
    let equal = compared.iter().filter(|eq| **eq).count();
    Some(equal as f64 / compared.len() as f64)
}

fn phone_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let suffix = |s: &str| s.len().checked_sub(PHONE_SUFFIX_DIGITS).map(|start| s[start..].to_string());
    match (suffix(a), suffix(b)) {
        (Some(x), Some(y)) if x == y => PHONE_SUFFIX_SCORE,
        _ => 0.0,
    }
}

fn email_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (a, b) = ordered(a, b);
    strsim::normalized_levenshtein(a, b)
}

/// Per-field sub-scores; `None` where a side lacks the field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldScores {
    pub identifier: Option<f64>,
    pub name: Option<f64>,
    pub phone: Option<f64>,
    pub email: Option<f64>,
    pub address: Option<f64>,
    pub postal_code: Option<f64>,
}

fn both<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<(&'a str, &'a str)> {
    Some((a.as_deref()?, b.as_deref()?))
}

/// Pairwise comparator
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    weights: FieldWeights,
    identifier_boost: f64,
}

impl SimilarityEngine {
    pub fn new(weights: FieldWeights, identifier_boost: f64) -> Self {
        Self {
            weights,
            identifier_boost,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.weights.clone(), config.identifier_boost)
    }

    /// Sub-scores for every comparable field
    pub fn field_scores(&self, a: &ComparableRecord, b: &ComparableRecord) -> FieldScores {
        FieldScores {
            identifier: identifier_score(a, b),
            name: both(&a.name, &b.name).map(|(x, y)| name_score(x, y)),
            phone: both(&a.phone, &b.phone).map(|(x, y)| phone_score(x, y)),
            email: both(&a.email, &b.email).map(|(x, y)| email_score(x, y)),
            address: both(&a.address, &b.address).map(|(x, y)| token_set_ratio(x, y)),
            postal_code: both(&a.postal_code, &b.postal_code).map(|(x, y)| if x == y { 1.0 } else { 0.0 }),
        }
    }

    /// Weighted score in `[0,1]` of two prepared records.
    ///
    /// Zero when the records share no comparable field: no evidence, no link.
    pub fn score_prepared(&self, a: &ComparableRecord, b: &ComparableRecord) -> f64 {
        let scores = self.field_scores(a, b);

        let identifier_weight = match scores.identifier {
            Some(s) if s >= 1.0 => self.weights.identifier * self.identifier_boost,
            _ => self.weights.identifier,
        };
        let weighted = [
            (scores.identifier, identifier_weight),
            (scores.name, self.weights.name),
            (scores.phone, self.weights.phone),
            (scores.email, self.weights.email),
            (scores.address, self.weights.address),
            (scores.postal_code, self.weights.postal_code),
        ];

        let (numerator, denominator) = weighted
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(n, d), (sw, w)| (n + sw, d + w));

        if denominator <= 0.0 {
            return 0.0;
        }
        (numerator / denominator).clamp(0.0, 1.0)
    }

    /// Score two normalized records
    pub fn score(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> f64 {
        self.score_prepared(&ComparableRecord::from_record(a), &ComparableRecord::from_record(b))
    }
}
