//! Validator
//!
//! Pure, table-driven checks over normalized records. Each [`FieldRule`]
//! pairs a format check with an optional semantic check; a field the table
//! does not know, or a missing field, yields nothing unless the domain
//! declares it mandatory.

pub mod checksum;

use crate::models::NormalizedRecord;
use crate::normalizer::rules::{
    CEP_FORMAT, CNPJ_FORMAT, CPF_FORMAT, EMAIL_FORMAT, ISO_DATE_FORMAT, PHONE_FORMAT, UF_CODES,
};
use chrono::NaiveDate;
use mdm_common::{Domain, Issue, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

const STAGE: &str = "validate";

/// Semantic check: `Err(message)` when the value is well-formed but wrong
type SemanticCheck = fn(&str) -> Result<(), String>;

/// Validation rule for one field
pub struct FieldRule {
    pub field: &'static str,
    pub format: &'static Lazy<Regex>,
    pub format_message: &'static str,
    pub semantic: Option<SemanticCheck>,
    /// Severity of a semantic failure; format failures are Medium
    pub semantic_severity: Severity,
}

fn check_cpf(value: &str) -> Result<(), String> {
    if checksum::cpf_is_valid(value) {
        Ok(())
    } else {
        Err("CPF check digits do not match".to_string())
    }
}

fn check_cnpj(value: &str) -> Result<(), String> {
    if checksum::cnpj_is_valid(value) {
        Ok(())
    } else {
        Err("CNPJ check digits do not match".to_string())
    }
}

fn check_calendar_date(value: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a calendar date", value))
}

fn check_uf(value: &str) -> Result<(), String> {
    if UF_CODES.contains(&value) {
        Ok(())
    } else {
        Err(format!("'{}' is not a Brazilian state code", value))
    }
}

static TWO_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").unwrap());

/// Rules for the canonical field names
pub static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        field: "cpf",
        format: &CPF_FORMAT,
        format_message: "CPF must be formatted NNN.NNN.NNN-NN",
        semantic: Some(check_cpf),
        semantic_severity: Severity::High,
    },
    FieldRule {
        field: "cnpj",
        format: &CNPJ_FORMAT,
        format_message: "CNPJ must be formatted NN.NNN.NNN/NNNN-NN",
        semantic: Some(check_cnpj),
        semantic_severity: Severity::High,
    },
    FieldRule {
        field: "email",
        format: &EMAIL_FORMAT,
        format_message: "email address is malformed",
        semantic: None,
        semantic_severity: Severity::Medium,
    },
    FieldRule {
        field: "phone",
        format: &PHONE_FORMAT,
        format_message: "phone must be +<country code><number> without separators",
        semantic: None,
        semantic_severity: Severity::Medium,
    },
    FieldRule {
        field: "cep",
        format: &CEP_FORMAT,
        format_message: "postal code must be formatted NNNNN-NNN",
        semantic: None,
        semantic_severity: Severity::Medium,
    },
    FieldRule {
        field: "birth_date",
        format: &ISO_DATE_FORMAT,
        format_message: "birth date must be YYYY-MM-DD",
        semantic: Some(check_calendar_date),
        semantic_severity: Severity::Medium,
    },
    FieldRule {
        field: "state",
        format: &TWO_LETTERS,
        format_message: "state must be a two-letter code",
        semantic: Some(check_uf),
        semantic_severity: Severity::Low,
    },
    FieldRule {
        field: "country_code",
        format: &TWO_LETTERS,
        format_message: "country must be an ISO alpha-2 code",
        semantic: None,
        semantic_severity: Severity::Low,
    },
];

/// Fields that must be present for a domain
pub fn mandatory_fields(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Customer => &["name"],
        Domain::Supplier => &["name", "cnpj"],
        Domain::Product => &["name"],
        Domain::Financial => &["name"],
        Domain::Address => &["cep"],
    }
}

/// Stateless validator for one domain
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    domain: Domain,
}

impl Validator {
    pub fn new(domain: Domain) -> Self {
        Self { domain }
    }

    /// Validate one record
    ///
    /// # Returns
    /// Issues in table order: mandatory-field findings first, then per-field
    /// format/semantic findings. Empty when the record is clean.
    pub fn validate(&self, record: &NormalizedRecord) -> Vec<Issue> {
        let issue = |field: &str, severity: Severity, message: String| {
            Issue::new(STAGE, severity, message)
                .for_record(record.index, record.id.as_deref())
                .on_field(field)
        };

        let mut issues = Vec::new();
        for field in mandatory_fields(self.domain) {
            if record.get(field).is_none() {
                issues.push(issue(
                    field,
                    Severity::Medium,
                    format!("{} is mandatory for {} records", field, self.domain),
                ));
            }
        }

        for rule in FIELD_RULES {
            let Some(value) = record.get(rule.field) else {
                continue;
            };
            if !rule.format.is_match(value) {
                issues.push(issue(rule.field, Severity::Medium, rule.format_message.to_string()));
                continue;
            }
            if let Some(check) = rule.semantic {
                if let Err(message) = check(value) {
                    issues.push(issue(rule.field, rule.semantic_severity, message));
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizationMethod;
    use std::collections::BTreeMap;

    fn record(pairs: &[(&str, &str)]) -> NormalizedRecord {
        let fields: BTreeMap<String, Option<String>> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        NormalizedRecord {
            index: 2,
            source: None,
            id: Some("c-2".into()),
            fields,
            parsed: None,
            method: NormalizationMethod::Rules,
        }
    }

    #[test]
    fn test_clean_record_has_no_issues() {
        let issues = Validator::new(Domain::Customer).validate(&record(&[
            ("name", "João da Silva"),
            ("cpf", "529.982.247-25"),
            ("email", "joao@example.com"),
            ("phone", "+5511987654321"),
            ("cep", "01310-100"),
            ("birth_date", "1985-03-12"),
            ("state", "SP"),
        ]));
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_bad_checksum_is_high_severity() {
        let issues = Validator::new(Domain::Customer).validate(&record(&[("name", "Ana"), ("cpf", "529.982.247-24")]));

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].field.as_deref(), Some("cpf"));
        assert_eq!(issues[0].index, Some(2));
    }

    #[test]
    fn test_format_failure_skips_semantic_check() {
        let issues = Validator::new(Domain::Customer).validate(&record(&[("name", "Ana"), ("cpf", "5299822472")]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_unknown_and_missing_fields_ignored() {
        let issues = Validator::new(Domain::Customer).validate(&record(&[("name", "Ana"), ("loyalty_tier", "???")]));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_mandatory_fields_per_domain() {
        let issues = Validator::new(Domain::Supplier).validate(&record(&[("name", "ACME Ltda")]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("cnpj"));

        let issues = Validator::new(Domain::Customer).validate(&record(&[("email", "a@b.com")]));
        assert_eq!(issues[0].field.as_deref(), Some("name"));
    }

    #[test]
    fn test_impossible_date() {
        let issues = Validator::new(Domain::Customer).validate(&record(&[("name", "Ana"), ("birth_date", "1985-02-30")]));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("calendar"));
    }
}
