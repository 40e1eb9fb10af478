//! Test Helper Utilities
//!
//! Shared utilities for testing mdm-hub

#![allow(dead_code)]

pub mod mock_ollama;
pub mod scripted_backend;

pub use mock_ollama::{spawn_mock_ollama, MockOllama};
pub use scripted_backend::{echo_model, ScriptedBackend};

use mdm_hub::config::DispatcherConfig;
use mdm_hub::dispatcher::{BackendPool, InferenceBackend, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy without backoff, for tests that count attempts
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

/// Endpoint names `http://gpu-0`, `http://gpu-1`, ...
pub fn endpoints(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("http://gpu-{}", i)).collect()
}

/// Pool over `backend` with the given concurrency and retry budget
pub fn pool_with(
    backend: Arc<dyn InferenceBackend>,
    endpoint_count: usize,
    concurrency: usize,
    max_retries: u32,
) -> BackendPool {
    let dispatcher = DispatcherConfig {
        concurrency_normalize: concurrency,
        concurrency_address: concurrency,
        max_retries,
        ..DispatcherConfig::default()
    };
    BackendPool::new(backend, endpoints(endpoint_count), &dispatcher, fast_policy(max_retries))
}
