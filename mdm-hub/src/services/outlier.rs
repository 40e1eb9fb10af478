//! Plausibility checks on normalized values

use crate::models::NormalizedRecord;
use crate::utils::text::digits;
use chrono::{Datelike, NaiveDate};
use mdm_common::{Issue, Severity};

const STAGE: &str = "outlier_check";
const MAX_AGE_YEARS: i32 = 120;
const MIN_NAME_LETTERS: usize = 2;
const MIN_PHONE_DIGITS: usize = 10;

/// Outlier issues for one record, judged against `today`
pub fn check_record(record: &NormalizedRecord, today: NaiveDate) -> Vec<Issue> {
    let issue = |field: &str, severity: Severity, message: String| {
        Issue::new(STAGE, severity, message)
            .for_record(record.index, record.id.as_deref())
            .on_field(field)
    };
    let mut issues = Vec::new();

    if let Some(value) = record.get("birth_date") {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            if date > today {
                issues.push(issue("birth_date", Severity::High, format!("birth date {} is in the future", value)));
            } else if today.year() - date.year() > MAX_AGE_YEARS {
                issues.push(issue(
                    "birth_date",
                    Severity::Medium,
                    format!("birth date {} is more than {} years ago", value, MAX_AGE_YEARS),
                ));
            }
        }
    }

    if let Some(name) = record.get("name") {
        let letters = name.chars().filter(|c| c.is_alphabetic()).count();
        if letters < MIN_NAME_LETTERS {
            issues.push(issue("name", Severity::Medium, format!("name '{}' is implausibly short", name)));
        }
    }

    if let Some(phone) = record.get("phone") {
        let count = digits(phone).len();
        if count < MIN_PHONE_DIGITS {
            issues.push(issue("phone", Severity::Medium, format!("phone has only {} digits", count)));
        }
    }

    issues
}
