//! Deterministic formatting rules
//!
//! Used three ways:
//! - the RuleBased strategy (no network)
//! - enforcement over model output, so canonical shapes never depend on
//!   the model getting punctuation right
//! - fallback when the model path fails
//!
//! Every function is total: input that cannot be formatted is returned
//! trimmed but otherwise unchanged.

use crate::utils::text::{collapse_whitespace, comparison_key, digits, title_case};
use chrono::NaiveDate;
use mdm_common::{ParsedAddress, RawRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// `NNN.NNN.NNN-NN`
pub static CPF_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}\.\d{3}\.\d{3}-\d{2}$").unwrap());
/// `NN.NNN.NNN/NNNN-NN`
pub static CNPJ_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}$").unwrap());
/// `NNNNN-NNN`
pub static CEP_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}-\d{3}$").unwrap());
/// `+<cc><subscriber digits>` (E.164 length)
pub static PHONE_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\d{8,15}$").unwrap());
pub static EMAIL_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9\-]+(\.[a-z0-9\-]+)*\.[a-z]{2,}$").unwrap());
pub static ISO_DATE_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static CEP_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5})-?(\d{3})\b").unwrap());
static SEGMENT_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[,;]\s*|\s+[-–]\s+").unwrap());
static STREET_WITH_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<street>.*?[^\d\s,])[\s,]+(?:(?i:n[º°o]?\.?)\s*)?(?P<number>\d+[A-Za-z]?)$").unwrap()
});
static NUMBER_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?i:n[º°o]?\.?)\s*)?(?P<number>\d+[A-Za-z]?)$").unwrap());
static COMPLEMENT_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^(ap|apt|bl|cj|lt|qd|sl)\b)|\b(apto|apartamento|bloco|casa|sala|conjunto|fundos|andar|lote|quadra|loja)\b")
        .unwrap()
});

/// Brazilian federative units
pub const UF_CODES: &[&str] = &[
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR", "PE", "PI",
    "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

const STATE_NAMES: &[(&str, &str)] = &[
    ("acre", "AC"),
    ("alagoas", "AL"),
    ("amapa", "AP"),
    ("amazonas", "AM"),
    ("bahia", "BA"),
    ("ceara", "CE"),
    ("distrito federal", "DF"),
    ("espirito santo", "ES"),
    ("goias", "GO"),
    ("maranhao", "MA"),
    ("mato grosso", "MT"),
    ("mato grosso do sul", "MS"),
    ("minas gerais", "MG"),
    ("para", "PA"),
    ("paraiba", "PB"),
    ("parana", "PR"),
    ("pernambuco", "PE"),
    ("piaui", "PI"),
    ("rio de janeiro", "RJ"),
    ("rio grande do norte", "RN"),
    ("rio grande do sul", "RS"),
    ("rondonia", "RO"),
    ("roraima", "RR"),
    ("santa catarina", "SC"),
    ("sao paulo", "SP"),
    ("sergipe", "SE"),
    ("tocantins", "TO"),
];

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("brasil", "BR"),
    ("brazil", "BR"),
    ("estados unidos", "US"),
    ("united states", "US"),
    ("united states of america", "US"),
    ("usa", "US"),
    ("eua", "US"),
    ("portugal", "PT"),
    ("argentina", "AR"),
    ("mexico", "MX"),
    ("chile", "CL"),
    ("colombia", "CO"),
    ("paraguai", "PY"),
    ("paraguay", "PY"),
    ("uruguai", "UY"),
    ("uruguay", "UY"),
    ("espanha", "ES"),
    ("spain", "ES"),
    ("alemanha", "DE"),
    ("germany", "DE"),
    ("franca", "FR"),
    ("france", "FR"),
    ("italia", "IT"),
    ("italy", "IT"),
    ("reino unido", "GB"),
    ("united kingdom", "GB"),
    ("canada", "CA"),
];

const CALLING_CODES: &[(&str, &str)] = &[
    ("BR", "55"),
    ("US", "1"),
    ("CA", "1"),
    ("PT", "351"),
    ("AR", "54"),
    ("MX", "52"),
    ("CL", "56"),
    ("CO", "57"),
    ("PY", "595"),
    ("UY", "598"),
    ("ES", "34"),
    ("DE", "49"),
    ("FR", "33"),
    ("IT", "39"),
    ("GB", "44"),
];

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Country used when a record carries no `country_code`
pub const DEFAULT_COUNTRY: &str = "BR";

/// UF code for a state name or code ("São Paulo" / "sp" → "SP")
pub fn state_code(raw: &str) -> Option<&'static str> {
    let key = comparison_key(raw);
    if let Some(code) = UF_CODES.iter().find(|code| code.eq_ignore_ascii_case(&key)) {
        return Some(code);
    }
    STATE_NAMES.iter().find(|(name, _)| *name == key).map(|(_, code)| *code)
}

/// ISO alpha-2 code for a country name or code
pub fn country_code(raw: &str) -> Option<String> {
    let key = comparison_key(raw);
    if key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(key.to_ascii_uppercase());
    }
    COUNTRY_NAMES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, code)| code.to_string())
}

/// International calling code for an ISO country
pub fn calling_code(country: &str) -> Option<&'static str> {
    CALLING_CODES
        .iter()
        .find(|(iso, _)| iso.eq_ignore_ascii_case(country))
        .map(|(_, code)| *code)
}

/// `NNN.NNN.NNN-NN` from any 11-digit rendering
pub fn format_cpf(raw: &str) -> String {
    let d = digits(raw);
    if d.len() == 11 {
        format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
    } else {
        raw.trim().to_string()
    }
}

/// `NN.NNN.NNN/NNNN-NN` from any 14-digit rendering
pub fn format_cnpj(raw: &str) -> String {
    let d = digits(raw);
    if d.len() == 14 {
        format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
    } else {
        raw.trim().to_string()
    }
}

/// `NNNNN-NNN` from any 8-digit rendering
pub fn format_cep(raw: &str) -> String {
    let d = digits(raw);
    if d.len() == 8 {
        format!("{}-{}", &d[0..5], &d[5..8])
    } else {
        raw.trim().to_string()
    }
}

fn national_length_ok(country: &str, len: usize) -> bool {
    match country {
        "BR" => (10..=11).contains(&len),
        "US" | "CA" => len == 10,
        _ => len >= 6,
    }
}

/// `+<cc><subscriber digits>` with no separators.
///
/// Already-international numbers (`+…` or `00…`) keep their own calling
/// code; national numbers get the calling code of `country` after the
/// trunk prefix `0` is dropped.
pub fn format_phone(raw: &str, country: Option<&str>) -> String {
    let trimmed = raw.trim();
    let mut d = digits(trimmed);
    if d.is_empty() {
        return trimmed.to_string();
    }

    if trimmed.starts_with('+') {
        return format!("+{}", d);
    }
    if let Some(rest) = d.strip_prefix("00") {
        return format!("+{}", rest);
    }

    let country = country.unwrap_or(DEFAULT_COUNTRY).to_ascii_uppercase();
    let Some(cc) = calling_code(&country) else {
        return format!("+{}", d);
    };

    if let Some(national) = d.strip_prefix(cc) {
        if national_length_ok(&country, national.len()) {
            return format!("+{}", d);
        }
    }

    d = d.trim_start_matches('0').to_string();
    format!("+{}{}", cc, d)
}

pub fn format_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// ISO `YYYY-MM-DD`; day-first readings win for slash dates
pub fn format_birth_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let candidate = if trimmed.len() > 10 && trimmed.as_bytes().get(10).map_or(false, |b| *b == b'T' || *b == b' ') {
        &trimmed[..10]
    } else {
        trimmed
    };

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(candidate, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn format_state(raw: &str) -> String {
    state_code(raw)
        .map(str::to_string)
        .unwrap_or_else(|| collapse_whitespace(raw))
}

pub fn format_country(raw: &str) -> String {
    country_code(raw).unwrap_or_else(|| collapse_whitespace(raw))
}

/// Format one field by its canonical name
pub fn format_field(field: &str, value: &str, country: Option<&str>) -> String {
    match field {
        "cpf" => format_cpf(value),
        "cnpj" => format_cnpj(value),
        "cep" | "postal_code" => format_cep(value),
        "phone" => format_phone(value, country),
        "email" => format_email(value),
        "birth_date" => format_birth_date(value),
        "state" => format_state(value),
        "country_code" => format_country(value),
        "name" | "city" | "address" | "neighborhood" => title_case(value),
        _ => collapse_whitespace(value),
    }
}

/// True when `value` already has the canonical shape for `field`.
/// Fields without a fixed shape always pass.
pub fn is_canonical(field: &str, value: &str) -> bool {
    match field {
        "cpf" => CPF_FORMAT.is_match(value),
        "cnpj" => CNPJ_FORMAT.is_match(value),
        "cep" | "postal_code" => CEP_FORMAT.is_match(value),
        "phone" => PHONE_FORMAT.is_match(value),
        "birth_date" => ISO_DATE_FORMAT.is_match(value),
        _ => true,
    }
}

/// Country of a record (formatted), if it has one
pub fn record_country(raw: &RawRecord) -> Option<String> {
    raw.get("country_code").map(format_country)
}

/// Rule-based normalization of every field of a record
pub fn normalize_fields(raw: &RawRecord) -> BTreeMap<String, Option<String>> {
    let country = record_country(raw);
    raw.fields
        .iter()
        .map(|(field, value)| {
            let formatted = value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format_field(field, v, country.as_deref()))
                .filter(|v| !v.is_empty());
            (field.clone(), formatted)
        })
        .collect()
}

fn field<'a>(fields: &'a BTreeMap<String, Option<String>>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Rule-based address parsing.
///
/// Understands the common Brazilian layout
/// `"<street>, <number> - <neighborhood>, <city> - <UF>, <cep>"` and its
/// usual variations; record-level `city`/`state`/`cep`/`country_code`
/// fields take precedence over values found in the address string.
/// Returns `None` when the record has neither an address nor a postal code.
pub fn parse_address(fields: &BTreeMap<String, Option<String>>) -> Option<ParsedAddress> {
    let address = field(fields, "address");
    let cep_field = field(fields, "cep");
    if address.is_none() && cep_field.is_none() {
        return None;
    }

    let mut parsed = ParsedAddress::default();
    let mut text_postal: Option<String> = None;
    let mut text_state: Option<String> = None;
    let mut text_city: Option<String> = None;

    if let Some(address) = address {
        let mut remaining = address.to_string();
        if let Some(caps) = CEP_IN_TEXT.captures(address) {
            text_postal = Some(format!("{}-{}", &caps[1], &caps[2]));
            remaining = CEP_IN_TEXT.replace(&remaining, " ").to_string();
        }

        let mut segments: Vec<String> = SEGMENT_SPLIT
            .split(&remaining)
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty() && s.chars().any(|c| c.is_alphanumeric()))
            .collect();

        // "City/UF" or a bare UF segment
        let mut kept = Vec::with_capacity(segments.len());
        for segment in segments.drain(..) {
            if let Some((city, uf)) = segment.rsplit_once('/') {
                if let Some(code) = state_code(uf) {
                    text_state = Some(code.to_string());
                    if !city.trim().is_empty() {
                        text_city = Some(title_case(city));
                    }
                    continue;
                }
            }
            if segment.len() == 2 && text_state.is_none() {
                if let Some(code) = state_code(&segment) {
                    text_state = Some(code.to_string());
                    continue;
                }
            }
            kept.push(segment);
        }

        let mut complements = Vec::new();
        let mut rest = Vec::new();
        for (position, segment) in kept.into_iter().enumerate() {
            if position == 0 {
                if let Some(caps) = STREET_WITH_NUMBER.captures(&segment) {
                    parsed.thoroughfare = Some(title_case(&caps["street"]));
                    parsed.house_number = Some(caps["number"].to_string());
                } else {
                    parsed.thoroughfare = Some(title_case(&segment));
                }
                continue;
            }
            if parsed.house_number.is_none() {
                if let Some(caps) = NUMBER_SEGMENT.captures(&segment) {
                    parsed.house_number = Some(caps["number"].to_string());
                    continue;
                }
            }
            if COMPLEMENT_SEGMENT.is_match(&segment) {
                complements.push(segment);
                continue;
            }
            rest.push(segment);
        }

        if !complements.is_empty() {
            parsed.complement = Some(complements.join(", "));
        }

        let city_field = field(fields, "city");
        match rest.len() {
            0 => {}
            1 => {
                let only = &rest[0];
                let same_as_city = city_field.map_or(false, |c| comparison_key(c) == comparison_key(only))
                    || text_city.as_deref().map_or(false, |c| comparison_key(c) == comparison_key(only));
                if same_as_city {
                    // already known as the city
                } else if city_field.is_some() || text_city.is_some() {
                    parsed.neighborhood = Some(title_case(only));
                } else {
                    text_city = Some(title_case(only));
                }
            }
            _ => {
                parsed.neighborhood = Some(title_case(&rest[0]));
                if text_city.is_none() {
                    text_city = Some(title_case(&rest[1]));
                }
            }
        }
    }

    parsed.city = field(fields, "city").map(title_case).or(text_city);
    parsed.state = field(fields, "state").map(format_state).or(text_state);
    parsed.postal_code = cep_field.map(format_cep).or(text_postal);
    parsed.country_code = field(fields, "country_code").map(format_country).or_else(|| {
        parsed
            .postal_code
            .as_deref()
            .filter(|pc| CEP_FORMAT.is_match(pc))
            .map(|_| DEFAULT_COUNTRY.to_string())
    });

    Some(parsed)
}

/// Apply the formatting rules to a model-produced address
pub fn canonicalize_address(mut parsed: ParsedAddress) -> ParsedAddress {
    let tidy = |v: Option<String>, f: fn(&str) -> String| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| f(&s))
    };
    parsed.thoroughfare = tidy(parsed.thoroughfare, title_case);
    parsed.house_number = tidy(parsed.house_number, collapse_whitespace);
    parsed.neighborhood = tidy(parsed.neighborhood, title_case);
    parsed.city = tidy(parsed.city, title_case);
    parsed.state = tidy(parsed.state, format_state);
    parsed.postal_code = tidy(parsed.postal_code, format_cep);
    parsed.country_code = tidy(parsed.country_code, format_country);
    parsed.complement = tidy(parsed.complement, collapse_whitespace);
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn test_cpf_shapes() {
        assert_eq!(format_cpf("12345678909"), "123.456.789-09");
        assert_eq!(format_cpf(" 123.456.789-09 "), "123.456.789-09");
        assert_eq!(format_cpf("123 456 789 09"), "123.456.789-09");
        assert_eq!(format_cpf("12345"), "12345");
    }

    #[test]
    fn test_cnpj_shape() {
        assert_eq!(format_cnpj("11222333000181"), "11.222.333/0001-81");
    }

    #[test]
    fn test_cep_shape() {
        assert_eq!(format_cep("01310100"), "01310-100");
        assert_eq!(format_cep("01310-100"), "01310-100");
        assert_eq!(format_cep("1310"), "1310");
    }

    #[test]
    fn test_phone_national_and_international() {
        assert_eq!(format_phone("(11) 98765-4321", None), "+5511987654321");
        assert_eq!(format_phone("011 98765-4321", None), "+5511987654321");
        assert_eq!(format_phone("+55 (11) 98765-4321", None), "+5511987654321");
        assert_eq!(format_phone("0055 11 98765 4321", None), "+5511987654321");
        assert_eq!(format_phone("5511987654321", None), "+5511987654321");
        assert_eq!(format_phone("(212) 555-0100", Some("US")), "+12125550100");
        assert_eq!(format_phone("n/a", None), "n/a");
    }

    #[test]
    fn test_phone_with_ddd_equal_to_country_code() {
        // DDD 55 (Rio Grande do Sul) must not be mistaken for the country code
        assert_eq!(format_phone("55 9876-5432", None), "+555598765432");
    }

    #[test]
    fn test_birth_date_formats() {
        assert_eq!(format_birth_date("12/03/1985"), "1985-03-12");
        assert_eq!(format_birth_date("12-03-1985"), "1985-03-12");
        assert_eq!(format_birth_date("1985-03-12"), "1985-03-12");
        assert_eq!(format_birth_date("19850312"), "1985-03-12");
        assert_eq!(format_birth_date("1985-03-12T00:00:00"), "1985-03-12");
        assert_eq!(format_birth_date("yesterday"), "yesterday");
    }

    #[test]
    fn test_state_and_country() {
        assert_eq!(format_state("São Paulo"), "SP");
        assert_eq!(format_state("sp"), "SP");
        assert_eq!(format_state("Atlantis"), "Atlantis");
        assert_eq!(format_country("Brasil"), "BR");
        assert_eq!(format_country("br"), "BR");
    }

    #[test]
    fn test_normalize_fields_blank_becomes_none() {
        let raw = RawRecord::default()
            .with("name", "  MARIA  DOS SANTOS ")
            .with("email", "  ")
            .with("cpf", "52998224725");
        let normalized = normalize_fields(&raw);

        assert_eq!(normalized["name"].as_deref(), Some("Maria dos Santos"));
        assert_eq!(normalized["email"], None);
        assert_eq!(normalized["cpf"].as_deref(), Some("529.982.247-25"));
    }

    #[test]
    fn test_format_is_idempotent_on_canonical_values() {
        for (field, value) in [
            ("cpf", "529.982.247-25"),
            ("cep", "01310-100"),
            ("phone", "+5511987654321"),
            ("birth_date", "1985-03-12"),
            ("name", "João da Silva"),
        ] {
            assert_eq!(format_field(field, value, None), value, "field {}", field);
            assert!(is_canonical(field, value));
        }
    }

    #[test]
    fn test_parse_full_brazilian_address() {
        let parsed = parse_address(&fields(&[(
            "address",
            "Rua das Flores, 123 - Centro, São Paulo - SP, 01310-100",
        )]))
        .unwrap();

        assert_eq!(parsed.thoroughfare.as_deref(), Some("Rua das Flores"));
        assert_eq!(parsed.house_number.as_deref(), Some("123"));
        assert_eq!(parsed.neighborhood.as_deref(), Some("Centro"));
        assert_eq!(parsed.city.as_deref(), Some("São Paulo"));
        assert_eq!(parsed.state.as_deref(), Some("SP"));
        assert_eq!(parsed.postal_code.as_deref(), Some("01310-100"));
        assert_eq!(parsed.country_code.as_deref(), Some("BR"));
    }

    #[test]
    fn test_parse_address_with_complement_and_fields() {
        let parsed = parse_address(&fields(&[
            ("address", "Av. Paulista 1000, apto 42, Bela Vista"),
            ("city", "são paulo"),
            ("state", "SP"),
            ("cep", "01310100"),
        ]))
        .unwrap();

        assert_eq!(parsed.thoroughfare.as_deref(), Some("Av. Paulista"));
        assert_eq!(parsed.house_number.as_deref(), Some("1000"));
        assert_eq!(parsed.complement.as_deref(), Some("apto 42"));
        assert_eq!(parsed.neighborhood.as_deref(), Some("Bela Vista"));
        assert_eq!(parsed.city.as_deref(), Some("São Paulo"));
        assert_eq!(parsed.postal_code.as_deref(), Some("01310-100"));
    }

    #[test]
    fn test_parse_address_postal_code_only() {
        let parsed = parse_address(&fields(&[("cep", "01310-100")])).unwrap();
        assert_eq!(parsed.postal_code.as_deref(), Some("01310-100"));
        assert!(parsed.thoroughfare.is_none());
    }

    #[test]
    fn test_parse_address_nothing_to_parse() {
        assert!(parse_address(&fields(&[("name", "Ana")])).is_none());
    }

    #[test]
    fn test_canonicalize_model_address() {
        let parsed = canonicalize_address(ParsedAddress {
            postal_code: Some("01310100".into()),
            state: Some("sao paulo".into()),
            city: Some(" ".into()),
            ..Default::default()
        });
        assert_eq!(parsed.postal_code.as_deref(), Some("01310-100"));
        assert_eq!(parsed.state.as_deref(), Some("SP"));
        assert_eq!(parsed.city, None);
    }
}
