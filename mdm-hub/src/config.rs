//! Configuration resolution for mdm-hub
//!
//! Provides multi-tier configuration resolution with ENV → TOML → compiled
//! default priority. Environment variable names are kept compatible with
//! existing deployments (`OLLAMA_ENDPOINTS`, `CONCURRENCY_NORMALIZE`, ...).

use mdm_common::config::{env_flag, env_list, env_parse, env_string, load_toml, resolve_config_path, LoggingConfig};
use mdm_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming the TOML file
pub const CONFIG_ENV_VAR: &str = "MDM_HUB_CONFIG";

/// Application name used for the per-user config directory
pub const APP_NAME: &str = "mdm-hub";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub inference: InferenceConfig,
    pub dispatcher: DispatcherConfig,
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    pub postal: PostalConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// Inference backends and generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Ordered endpoint list (round-robin order)
    pub endpoints: Vec<String>,
    pub model_normalize: String,
    pub model_address: String,
    pub num_ctx: u32,
    pub num_batch: u32,
    pub num_gpu: u32,
    pub num_thread: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Per-call timeout (seconds)
    pub request_timeout_secs: f64,
    pub connect_timeout_secs: f64,
    /// Directory holding `customer_prompt.txt` / `address_prompt.txt` overrides
    pub prompt_dir: Option<PathBuf>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:11434".to_string()],
            model_normalize: "qwen2.5:7b".to_string(),
            model_address: "qwen2.5:7b".to_string(),
            num_ctx: 4096,
            num_batch: 512,
            num_gpu: 22,
            num_thread: 16,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 40,
            request_timeout_secs: 180.0,
            connect_timeout_secs: 5.0,
            prompt_dir: None,
        }
    }
}

impl InferenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs.max(0.001))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs.max(0.001))
    }
}

/// Admission control, retry and health-tracking budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Max in-flight calls of class "normalize"
    pub concurrency_normalize: usize,
    /// Max in-flight calls of class "address"
    pub concurrency_address: usize,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failures before an endpoint is marked unhealthy
    pub failure_threshold: u32,
    /// Minimum spacing between probe calls to an unhealthy endpoint
    pub probe_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_normalize: 8,
            concurrency_address: 8,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            failure_threshold: 3,
            probe_interval_secs: 30,
        }
    }
}

/// Relative weight of each comparable field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub identifier: f64,
    pub name: f64,
    pub phone: f64,
    pub email: f64,
    pub address: f64,
    pub postal_code: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            identifier: 0.35,
            name: 0.25,
            phone: 0.15,
            email: 0.10,
            address: 0.10,
            postal_code: 0.05,
        }
    }
}

impl FieldWeights {
    fn all(&self) -> [f64; 6] {
        [
            self.identifier,
            self.name,
            self.phone,
            self.email,
            self.address,
            self.postal_code,
        ]
    }
}

/// Candidate-pair generation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    /// Every pair in the batch
    #[default]
    None,
    /// Only pairs sharing a postal-code prefix (records without one compare with all)
    PostalPrefix,
}

/// Similarity engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Acceptance threshold for match edges
    pub threshold: f64,
    /// Weight multiplier applied to the identifier when identifiers agree
    pub identifier_boost: f64,
    pub weights: FieldWeights,
    pub blocking: BlockingMode,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.87,
            identifier_boost: 2.0,
            weights: FieldWeights::default(),
            blocking: BlockingMode::None,
        }
    }
}

/// Batch orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_deadline_secs: u64,
    /// Default source ranking for golden-record selection
    pub source_priority: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_deadline_secs: 300,
            source_priority: vec!["ERP".to_string(), "CRM".to_string()],
        }
    }
}

impl PipelineConfig {
    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }
}

/// Postal-code enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostalConfig {
    pub enabled: bool,
    pub zipcodebase_key: Option<String>,
    pub zipcodebase_url: String,
    pub viacep_url: String,
    pub max_concurrency: usize,
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    /// Base delay for 429/5xx backoff (milliseconds)
    pub base_delay_ms: u64,
}

impl Default for PostalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            zipcodebase_key: None,
            zipcodebase_url: "https://app.zipcodebase.com/api/v1/search".to_string(),
            viacep_url: "https://viacep.com.br".to_string(),
            max_concurrency: 4,
            requests_per_second: 5,
            request_timeout_secs: 10,
            base_delay_ms: 1000,
        }
    }
}

impl HubConfig {
    /// Resolve the full configuration: TOML file (if any), then environment
    /// overrides, then validation.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR, APP_NAME);
        let mut config: HubConfig = load_toml(path.as_deref())?;
        config.apply_env_overrides()?;
        config.validate()?;

        info!(
            endpoints = config.inference.endpoints.len(),
            concurrency_normalize = config.dispatcher.concurrency_normalize,
            concurrency_address = config.dispatcher.concurrency_address,
            threshold = config.matching.threshold,
            "Configuration resolved"
        );
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = env_string("APP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("APP_PORT")? {
            self.server.port = port;
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        let inference = &mut self.inference;
        if let Some(endpoints) = env_list("OLLAMA_ENDPOINTS") {
            inference.endpoints = endpoints;
        }
        if let Some(model) = env_string("MODEL_NORMALIZE") {
            inference.model_normalize = model;
        }
        if let Some(model) = env_string("MODEL_ADDRESS") {
            inference.model_address = model;
        }
        if let Some(v) = env_parse("NUM_GPU")? {
            inference.num_gpu = v;
        }
        if let Some(v) = env_parse("NUM_BATCH")? {
            inference.num_batch = v;
        }
        if let Some(v) = env_parse("NUM_CTX")? {
            inference.num_ctx = v;
        }
        if let Some(v) = env_parse("NUM_THREAD")? {
            inference.num_thread = v;
        }
        if let Some(v) = env_parse("TEMPERATURE")? {
            inference.temperature = v;
        }
        if let Some(v) = env_parse("TOP_P")? {
            inference.top_p = v;
        }
        if let Some(v) = env_parse("TOP_K")? {
            inference.top_k = v;
        }
        if let Some(v) = env_parse("REQUEST_TIMEOUT")? {
            inference.request_timeout_secs = v;
        }

        if let Some(v) = env_parse("CONCURRENCY_NORMALIZE")? {
            self.dispatcher.concurrency_normalize = v;
        }
        if let Some(v) = env_parse("CONCURRENCY_ADDRESS")? {
            self.dispatcher.concurrency_address = v;
        }

        if let Some(enabled) = env_flag("USE_POSTAL_LOOKUP") {
            self.postal.enabled = enabled;
        }
        if let Some(key) = env_string("ZIPCODEBASE_KEY") {
            self.postal.zipcodebase_key = Some(key);
        }
        if let Some(v) = env_parse("ZIPCODEBASE_MAX_CONCURRENCY")? {
            self.postal.max_concurrency = v;
        }

        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.inference.endpoints.is_empty() {
            return Err(Error::Config("At least one inference endpoint is required".to_string()));
        }
        if self.dispatcher.concurrency_normalize == 0 || self.dispatcher.concurrency_address == 0 {
            return Err(Error::Config("Dispatcher concurrency limits must be >= 1".to_string()));
        }
        if self.dispatcher.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            return Err(Error::Config(format!(
                "Matching threshold {} outside [0, 1]",
                self.matching.threshold
            )));
        }
        if self.matching.identifier_boost < 1.0 {
            return Err(Error::Config("identifier_boost must be >= 1.0".to_string()));
        }
        let weights = self.matching.weights.all();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config(
                "Matching weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if self.postal.max_concurrency == 0 || self.postal.requests_per_second == 0 {
            return Err(Error::Config("Postal lookup limits must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.dispatcher.max_retries, 2);
        assert_eq!(config.matching.threshold, 0.87);
        assert_eq!(config.pipeline.source_priority, vec!["ERP", "CRM"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [dispatcher]
            concurrency_normalize = 2

            [matching.weights]
            name = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.concurrency_normalize, 2);
        assert_eq!(config.dispatcher.concurrency_address, 8);
        assert_eq!(config.matching.weights.name, 0.5);
        assert_eq!(config.matching.weights.identifier, 0.35);
        assert_eq!(config.inference.endpoints, vec!["http://localhost:11434"]);
    }

    #[test]
    fn test_blocking_mode_parses() {
        let config: HubConfig = toml::from_str("[matching]\nblocking = \"postal_prefix\"\n").unwrap();
        assert_eq!(config.matching.blocking, BlockingMode::PostalPrefix);
    }

    #[test]
    fn test_validation_rejects_empty_endpoints() {
        let mut config = HubConfig::default();
        config.inference.endpoints.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_weights() {
        let mut config = HubConfig::default();
        config.matching.weights = FieldWeights {
            identifier: 0.0,
            name: 0.0,
            phone: 0.0,
            email: 0.0,
            address: 0.0,
            postal_code: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_threshold_out_of_range() {
        let mut config = HubConfig::default();
        config.matching.threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
