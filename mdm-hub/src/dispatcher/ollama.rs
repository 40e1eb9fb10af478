//! Ollama HTTP backend
//!
//! `POST {endpoint}/api/generate` with `format = "json"` and `stream = false`;
//! the generated text is the envelope's `response` string.

use super::backend::{BackendError, GenerationParams, InferenceBackend};
use crate::config::InferenceConfig;
use crate::utils::extract_json_object;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Ollama protocol client
pub struct OllamaBackend {
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(config: &InferenceConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            request_timeout: config.request_timeout(),
        })
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            BackendError::Connect(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

fn endpoint_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(
        &self,
        endpoint: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let payload = json!({
            "model": params.model,
            "prompt": prompt,
            "format": "json",
            "options": {
                "num_ctx": params.num_ctx,
                "num_batch": params.num_batch,
                "num_gpu": params.num_gpu,
                "num_thread": params.num_thread,
                "temperature": params.temperature,
                "top_p": params.top_p,
                "top_k": params.top_k,
            },
            "stream": false,
        });

        let response = self
            .http_client
            .post(endpoint_url(endpoint, "/api/generate"))
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_reqwest_error(e))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            return Err(BackendError::Status(status.as_u16(), snippet));
        }

        let envelope = extract_json_object(&body)
            .ok_or_else(|| BackendError::InvalidEnvelope("response body is not a JSON object".to_string()))?;

        match envelope.get("response") {
            Some(serde_json::Value::String(text)) => Ok(text.clone()),
            _ => Err(BackendError::InvalidEnvelope(
                "envelope has no `response` string".to_string(),
            )),
        }
    }

    async fn ping(&self, endpoint: &str) -> Result<u16, BackendError> {
        let response = self
            .http_client
            .get(endpoint_url(endpoint, "/api/tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_strips_trailing_slash() {
        assert_eq!(
            endpoint_url("http://gpu-1:11434/", "/api/generate"),
            "http://gpu-1:11434/api/generate"
        );
        assert_eq!(endpoint_url("http://gpu-1:11434", "/api/tags"), "http://gpu-1:11434/api/tags");
    }

    #[test]
    fn test_client_creation() {
        let backend = OllamaBackend::new(&InferenceConfig::default());
        assert!(backend.is_ok());
    }
}
