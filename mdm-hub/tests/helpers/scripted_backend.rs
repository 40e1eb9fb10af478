//! In-process inference backend with scripted answers

use async_trait::async_trait;
use mdm_hub::dispatcher::{BackendError, GenerationParams, InferenceBackend};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&str, &str) -> Result<String, BackendError> + Send + Sync;

/// Answers `generate(endpoint, prompt)` through a closure and records
/// every call plus the peak number of calls in flight.
pub struct ScriptedBackend {
    responder: Box<Responder>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, BackendError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Endpoints called, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(
        &self,
        endpoint: &str,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, BackendError> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.responder)(endpoint, prompt);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn ping(&self, endpoint: &str) -> Result<u16, BackendError> {
        (self.responder)(endpoint, "ping").map(|_| 200)
    }
}

/// A model that hands the record back unchanged.
///
/// The record JSON is the tail of every built-in prompt; the formatting
/// rules then produce canonical values from it.
pub fn echo_model(_endpoint: &str, prompt: &str) -> Result<String, BackendError> {
    Ok(prompt.rsplit("Record:\n").next().unwrap_or("{}").trim().to_string())
}
