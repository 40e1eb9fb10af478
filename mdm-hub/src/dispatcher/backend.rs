//! Inference backend seam
//!
//! The dispatcher talks to physical endpoints only through
//! [`InferenceBackend`]; the production implementation speaks the Ollama
//! HTTP protocol, tests substitute scripted backends.

use crate::config::InferenceConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::OperationClass;

/// Generation parameters sent with every prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub model: String,
    pub num_ctx: u32,
    pub num_batch: u32,
    pub num_gpu: u32,
    pub num_thread: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl GenerationParams {
    /// Parameters for an operation class (model differs per class)
    pub fn for_class(config: &InferenceConfig, class: OperationClass) -> Self {
        let model = match class {
            OperationClass::Normalize => config.model_normalize.clone(),
            OperationClass::Address => config.model_address.clone(),
        };
        Self {
            model,
            num_ctx: config.num_ctx,
            num_batch: config.num_batch,
            num_gpu: config.num_gpu,
            num_thread: config.num_thread,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }
}

/// Transport-level backend failure
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Malformed response envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Client errors (4xx except 429) mean the endpoint is alive but refuses
    /// the request; repeating it elsewhere will not help.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Status(code, _) => !((400..500).contains(code) && *code != 429),
            _ => true,
        }
    }
}

/// A service that turns a prompt into generated text
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Generate text for `prompt` on `endpoint`
    async fn generate(
        &self,
        endpoint: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;

    /// Lightweight reachability check; returns the HTTP status code
    async fn ping(&self, endpoint: &str) -> Result<u16, BackendError>;
}
