//! Backend Pool Dispatcher
//!
//! Owns the set of inference endpoints and exposes a single
//! [`BackendPool::invoke`] call. Callers never learn which endpoint served
//! a request.
//!
//! # Admission control
//! Each [`OperationClass`] has its own semaphore; a call that would exceed
//! the class limit waits for a free slot. The permit is held for the whole
//! call including retries and backoff.
//!
//! # Retry policy
//! Timeouts and transport errors are retried up to `max_retries` extra
//! attempts with capped exponential backoff plus jitter, rotating to the
//! next endpoint each time. Client errors (4xx except 429) are not retried.
//!
//! # Health
//! An endpoint is unhealthy after `failure_threshold` consecutive failures
//! and receives at most one probe call per `probe_interval`. When every
//! endpoint is unhealthy and no probe is due, `invoke` fails fast with
//! [`DispatchError::AllEndpointsUnhealthy`].
//!
//! The semaphores and the health table are the only shared mutable state.

pub mod backend;
mod health;
pub mod ollama;

pub use backend::{BackendError, GenerationParams, InferenceBackend};
pub use health::EndpointStatus;
pub use ollama::OllamaBackend;

use crate::config::{DispatcherConfig, InferenceConfig};
use health::HealthTable;
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Named category of inference work with its own concurrency budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Normalize,
    Address,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Normalize => "normalize",
            OperationClass::Address => "address",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatcher failure as seen by callers
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every endpoint is unhealthy and no probe is due
    #[error("All {endpoints} inference endpoints are unhealthy")]
    AllEndpointsUnhealthy { endpoints: usize },

    #[error("{class} call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        class: OperationClass,
        attempts: u32,
        last_error: BackendError,
    },

    #[error("Endpoint {endpoint} rejected {class} request: {source}")]
    Rejected {
        class: OperationClass,
        endpoint: String,
        #[source]
        source: BackendError,
    },

    #[error("Dispatcher is shut down")]
    Closed,
}

impl DispatchError {
    /// Total backend exhaustion (as opposed to a single failed call)
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, DispatchError::AllEndpointsUnhealthy { .. })
    }
}

/// Retry and backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(dispatcher: &DispatcherConfig, inference: &InferenceConfig) -> Self {
        Self {
            max_retries: dispatcher.max_retries,
            backoff_base: Duration::from_millis(dispatcher.backoff_base_ms),
            backoff_max: Duration::from_millis(dispatcher.backoff_max_ms),
            request_timeout: inference.request_timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): base·2^(retry-1), capped,
    /// plus up to 25% jitter.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let base_ms = self.backoff_base.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max.as_millis() as u64);
        let jitter_ms = if delay_ms >= 4 {
            rand::thread_rng().gen_range(0..=delay_ms / 4)
        } else {
            0
        };
        Duration::from_millis(delay_ms + jitter_ms)
    }
}

/// Pool of inference endpoints behind one `invoke` call
pub struct BackendPool {
    backend: Arc<dyn InferenceBackend>,
    normalize_slots: Semaphore,
    address_slots: Semaphore,
    health: Mutex<HealthTable>,
    policy: RetryPolicy,
}

impl BackendPool {
    /// Build a pool with the production Ollama backend
    pub fn from_config(
        inference: &InferenceConfig,
        dispatcher: &DispatcherConfig,
    ) -> Result<Self, BackendError> {
        let backend = Arc::new(OllamaBackend::new(inference)?);
        Ok(Self::new(backend, inference.endpoints.clone(), dispatcher, RetryPolicy::from_config(dispatcher, inference)))
    }

    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        endpoints: Vec<String>,
        dispatcher: &DispatcherConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            normalize_slots: Semaphore::new(dispatcher.concurrency_normalize.max(1)),
            address_slots: Semaphore::new(dispatcher.concurrency_address.max(1)),
            health: Mutex::new(HealthTable::new(
                endpoints,
                dispatcher.failure_threshold,
                Duration::from_secs(dispatcher.probe_interval_secs),
            )),
            policy,
        }
    }

    fn slots(&self, class: OperationClass) -> &Semaphore {
        match class {
            OperationClass::Normalize => &self.normalize_slots,
            OperationClass::Address => &self.address_slots,
        }
    }

    fn health(&self) -> MutexGuard<'_, HealthTable> {
        // the table is updated atomically per call; a poisoned lock still holds consistent data
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of configured endpoints
    pub fn endpoint_count(&self) -> usize {
        self.health().len()
    }

    /// Free slots for a class (diagnostics and tests)
    pub fn available_slots(&self, class: OperationClass) -> usize {
        self.slots(class).available_permits()
    }

    /// Fail fast when no endpoint could serve a call right now
    pub fn ensure_available(&self) -> Result<(), DispatchError> {
        let health = self.health();
        if health.any_available(Instant::now()) {
            Ok(())
        } else {
            Err(DispatchError::AllEndpointsUnhealthy { endpoints: health.len() })
        }
    }

    /// Per-endpoint health snapshot
    pub fn health_snapshot(&self) -> Vec<EndpointStatus> {
        self.health().snapshot()
    }

    /// Reachability check against the first configured endpoint
    pub async fn ping(&self) -> (String, Result<u16, BackendError>) {
        let endpoint = {
            let health = self.health();
            if health.len() == 0 {
                return (String::new(), Err(BackendError::Connect("no endpoints configured".to_string())));
            }
            health.endpoint(0).to_string()
        };
        let result = self.backend.ping(&endpoint).await;
        (endpoint, result)
    }

    /// Run one inference call under the class's admission limit.
    pub async fn invoke(
        &self,
        class: OperationClass,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, DispatchError> {
        let _permit = self
            .slots(class)
            .acquire()
            .await
            .map_err(|_| DispatchError::Closed)?;

        let attempts = self.policy.max_retries + 1;
        let mut previous: Option<usize> = None;
        let mut last_error: Option<BackendError> = None;

        for attempt in 1..=attempts {
            let (index, endpoint) = {
                let mut health = self.health();
                match health.select(previous, Instant::now()) {
                    Some(index) => (index, health.endpoint(index).to_string()),
                    None => {
                        error!(class = %class, "All inference endpoints unhealthy, failing fast");
                        return Err(DispatchError::AllEndpointsUnhealthy { endpoints: health.len() });
                    }
                }
            };

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.policy.request_timeout,
                self.backend.generate(&endpoint, prompt, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.policy.request_timeout)),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(text) => {
                    self.health().record_success(index);
                    debug!(
                        class = %class,
                        endpoint = %endpoint,
                        backend = self.backend.name(),
                        attempt,
                        elapsed_ms,
                        "Inference call succeeded"
                    );
                    return Ok(text);
                }
                Err(err) if !err.is_retryable() => {
                    self.health().record_alive(index);
                    warn!(class = %class, endpoint = %endpoint, error = %err, "Inference request rejected");
                    return Err(DispatchError::Rejected {
                        class,
                        endpoint,
                        source: err,
                    });
                }
                Err(err) => {
                    self.health().record_failure(index, Instant::now());
                    warn!(
                        class = %class,
                        endpoint = %endpoint,
                        attempt,
                        attempts,
                        elapsed_ms,
                        error = %err,
                        "Inference attempt failed"
                    );
                    last_error = Some(err);
                    previous = Some(index);

                    if attempt < attempts {
                        let delay = self.policy.backoff_delay(attempt);
                        debug!(class = %class, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or(BackendError::Transport("no attempt made".to_string()));
        error!(class = %class, attempts, error = %last_error, "Inference call failed after retries");
        Err(DispatchError::RetriesExhausted {
            class,
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let p = policy(100, 10_000);
        let first = p.backoff_delay(1).as_millis();
        let second = p.backoff_delay(2).as_millis();
        let third = p.backoff_delay(3).as_millis();

        assert!((100..=125).contains(&first));
        assert!((200..=250).contains(&second));
        assert!((400..=500).contains(&third));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy(100, 300);
        let delay = p.backoff_delay(10).as_millis();
        assert!((300..=375).contains(&delay));
    }

    #[test]
    fn test_zero_base_has_no_delay() {
        let p = policy(0, 0);
        assert_eq!(p.backoff_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_pool_exhausted_classification() {
        assert!(DispatchError::AllEndpointsUnhealthy { endpoints: 2 }.is_pool_exhausted());
        assert!(!DispatchError::Closed.is_pool_exhausted());
    }
}
