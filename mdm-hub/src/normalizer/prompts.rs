//! Prompt templates for the model-backed strategy
//!
//! Templates contain one `{input_json}` placeholder that receives the
//! serialized record. Built-in templates can be replaced by files in the
//! configured prompt directory (`customer_prompt.txt`, `address_prompt.txt`).

use mdm_common::{Error, Result};
use std::path::Path;
use tracing::info;

/// Placeholder substituted with the record JSON
pub const INPUT_PLACEHOLDER: &str = "{input_json}";

const NORMALIZE_FILE: &str = "customer_prompt.txt";
const ADDRESS_FILE: &str = "address_prompt.txt";

const DEFAULT_NORMALIZE_PROMPT: &str = r#"You clean master-data records from Brazilian business systems.
Rewrite the record below into canonical form and answer with ONE JSON object only.

Rules:
- Keep every input field name; do not invent values for missing fields (use null).
- name: proper case, single spaces, keep accents ("JOÃO DA SILVA" -> "João da Silva").
- cpf: "NNN.NNN.NNN-NN"; cnpj: "NN.NNN.NNN/NNNN-NN".
- cep: "NNNNN-NNN".
- phone: E.164 without separators ("+5511987654321"); national numbers are Brazilian.
- email: lower case, trimmed.
- birth_date: ISO "YYYY-MM-DD" (input dates are day-first).
- state: two-letter UF code; country_code: ISO alpha-2.

Record:
{input_json}
"#;

const DEFAULT_ADDRESS_PROMPT: &str = r#"Split the Brazilian address in the record below into components.
Answer with ONE JSON object with exactly these keys:
"thoroughfare", "house_number", "neighborhood", "city", "state", "postal_code", "country_code", "complement".
Use null for anything not present. state is the two-letter UF code, postal_code is "NNNNN-NNN",
country_code is ISO alpha-2.

Record:
{input_json}
"#;

/// The two templates used by the normalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub normalize: String,
    pub address: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            normalize: DEFAULT_NORMALIZE_PROMPT.to_string(),
            address: DEFAULT_ADDRESS_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Built-in templates, overridden by files present in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };

        if let Some(text) = read_override(dir, NORMALIZE_FILE)? {
            templates.normalize = text;
        }
        if let Some(text) = read_override(dir, ADDRESS_FILE)? {
            templates.address = text;
        }
        Ok(templates)
    }

    pub fn render_normalize(&self, input_json: &str) -> String {
        render(&self.normalize, input_json)
    }

    pub fn render_address(&self, input_json: &str) -> String {
        render(&self.address, input_json)
    }
}

fn read_override(dir: &Path, file: &str) -> Result<Option<String>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    if !text.contains(INPUT_PLACEHOLDER) {
        return Err(Error::Config(format!(
            "prompt template {} has no {} placeholder",
            path.display(),
            INPUT_PLACEHOLDER
        )));
    }
    info!(path = %path.display(), "Loaded prompt template override");
    Ok(Some(text))
}

fn render(template: &str, input_json: &str) -> String {
    template.replace(INPUT_PLACEHOLDER, input_json)
}
