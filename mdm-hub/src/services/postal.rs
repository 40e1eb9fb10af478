//! Postal-code lookup client
//!
//! Enrichment only: results never influence matching. Zipcodebase is
//! queried when an API key is configured; Brazilian codes fall back to
//! ViaCEP. Lookups never fail outward, a miss is `None`.
//!
//! # Rate limiting
//! A governor token bucket spaces requests (`requests_per_second`) and a
//! semaphore caps requests in flight (`max_concurrency`).
//!
//! # Caching
//! Results are cached per code for the life of the service. Concurrent
//! lookups of the same code share one request: later callers await the
//! first caller's result. Misses are evicted so a later batch tries again.

use crate::config::PostalConfig;
use crate::utils::text::digits;
use crate::utils::value_as_string;
use governor::{Quota, RateLimiter};
use mdm_common::{Error, ParsedAddress, Result};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, error, warn};

/// Attempts per Zipcodebase lookup
const MAX_ATTEMPTS: u32 = 3;
/// Upper bound of the random jitter added to backoff sleeps
const JITTER_MAX_MS: u64 = 500;
/// Codes shorter than this are not looked up
const MIN_CODE_DIGITS: usize = 5;

/// Locality data for a postal code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalInfo {
    pub postal_code: String,
    pub thoroughfare: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country_code: String,
    /// "zipcodebase" or "viacep"
    pub provider: String,
}

impl PostalInfo {
    /// Fill empty components of a parsed address; populated ones win
    pub fn fill(&self, parsed: &mut ParsedAddress) {
        fn fill_one(slot: &mut Option<String>, value: &Option<String>) {
            if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
                if let Some(v) = value {
                    *slot = Some(v.clone());
                }
            }
        }
        fill_one(&mut parsed.thoroughfare, &self.thoroughfare);
        fill_one(&mut parsed.neighborhood, &self.neighborhood);
        fill_one(&mut parsed.city, &self.city);
        fill_one(&mut parsed.state, &self.state);
        fill_one(&mut parsed.postal_code, &Some(self.postal_code.clone()));
        fill_one(&mut parsed.country_code, &Some(self.country_code.clone()));
    }
}

/// ViaCEP `/ws/{cep}/json/` body
#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    logradouro: Option<String>,
    #[serde(default)]
    bairro: Option<String>,
    #[serde(default)]
    localidade: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    erro: Option<Value>,
}

/// Render 8-digit codes as `NNNNN-NNN`
fn display_code(code: &str) -> String {
    if code.len() == 8 {
        format!("{}-{}", &code[..5], &code[5..])
    } else {
        code.to_string()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

type Limiter = RateLimiter<governor::state::direct::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;
type CacheSlot = Arc<OnceCell<Option<PostalInfo>>>;

/// Postal-code client shared across batches; its cache only feeds enrichment
/// and is never read by matching.
pub struct PostalLookup {
    client: Client,
    config: PostalConfig,
    limiter: Limiter,
    permits: Semaphore,
    cache: Mutex<HashMap<String, CacheSlot>>,
}

impl PostalLookup {
    pub fn new(config: &PostalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build postal HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            config: config.clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            permits: Semaphore::new(config.max_concurrency.max(1)),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheSlot>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of cached codes (diagnostics and tests)
    pub fn cached(&self) -> usize {
        self.cache().values().filter(|slot| slot.get().map_or(false, Option::is_some)).count()
    }

    /// Look up a postal code.
    ///
    /// # Arguments
    /// * `postal_code` - code in any punctuation
    /// * `country` - ISO alpha-2 country, `BR` when absent
    pub async fn lookup(&self, postal_code: &str, country: Option<&str>) -> Option<PostalInfo> {
        let code = digits(postal_code);
        if code.len() < MIN_CODE_DIGITS {
            return None;
        }
        let country = country.unwrap_or("BR").trim().to_uppercase();
        let key = format!("{}:{}", country, code);

        let slot = self.cache().entry(key.clone()).or_default().clone();
        let result = slot.get_or_init(|| self.fetch(&code, &country)).await.clone();

        if result.is_none() {
            let mut cache = self.cache();
            if cache.get(&key).map_or(false, |current| Arc::ptr_eq(current, &slot)) {
                cache.remove(&key);
            }
        }
        result
    }

    async fn fetch(&self, code: &str, country: &str) -> Option<PostalInfo> {
        let Ok(_permit) = self.permits.acquire().await else {
            return None;
        };

        let mut info = None;
        if let Some(key) = self.config.zipcodebase_key.as_deref().filter(|k| !k.is_empty()) {
            info = self.zipcodebase(code, country, key).await;
        }
        if info.is_none() && country == "BR" && code.len() == 8 {
            info = self.viacep(code).await;
        }

        debug!(postal_code = code, found = info.is_some(), "Postal lookup complete");
        info
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=JITTER_MAX_MS);
        Duration::from_millis(self.config.base_delay_ms * attempt as u64 + jitter)
    }

    async fn zipcodebase(&self, code: &str, country: &str, api_key: &str) -> Option<PostalInfo> {
        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.until_ready().await;

            let response = self
                .client
                .get(&self.config.zipcodebase_url)
                .query(&[("codes", code), ("country", country), ("apikey", api_key)])
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let wait = self.backoff(attempt);
                    warn!(postal_code = code, attempt, error = %e, wait_ms = wait.as_millis() as u64, "Zipcodebase network error");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|secs| Duration::from_secs(secs) + Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS)))
                    .unwrap_or_else(|| self.backoff(attempt));
                warn!(postal_code = code, attempt, wait_ms = wait.as_millis() as u64, "Zipcodebase rate limited");
                tokio::time::sleep(wait).await;
                continue;
            }
            if status.is_client_error() {
                error!(postal_code = code, status = status.as_u16(), "Zipcodebase rejected request");
                return None;
            }
            if status.is_server_error() {
                let wait = self.backoff(attempt);
                warn!(postal_code = code, attempt, status = status.as_u16(), "Zipcodebase server error, retrying");
                tokio::time::sleep(wait).await;
                continue;
            }

            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    error!(postal_code = code, error = %e, "Zipcodebase response not JSON");
                    return None;
                }
            };
            return parse_zipcodebase(&body, code, country);
        }
        None
    }

    async fn viacep(&self, code: &str) -> Option<PostalInfo> {
        self.limiter.until_ready().await;
        let url = format!("{}/ws/{}/json/", self.config.viacep_url.trim_end_matches('/'), code);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(postal_code = code, error = %e, "ViaCEP request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(postal_code = code, status = response.status().as_u16(), "ViaCEP returned error status");
            return None;
        }

        let body: ViaCepResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!(postal_code = code, error = %e, "ViaCEP response not understood");
                return None;
            }
        };
        let not_found = match &body.erro {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        if not_found {
            return None;
        }

        Some(PostalInfo {
            postal_code: display_code(code),
            thoroughfare: non_blank(body.logradouro),
            neighborhood: non_blank(body.bairro),
            city: non_blank(body.localidade),
            state: non_blank(body.uf),
            country_code: "BR".to_string(),
            provider: "viacep".to_string(),
        })
    }
}

/// First result for `code` in a Zipcodebase search body.
///
/// `results` is an object keyed by code, or an empty array when nothing matched.
fn parse_zipcodebase(body: &Value, code: &str, country: &str) -> Option<PostalInfo> {
    let entry = body.get("results")?.get(code)?.as_array()?.first()?;
    Some(PostalInfo {
        postal_code: display_code(code),
        thoroughfare: value_as_string(entry.get("street")),
        neighborhood: value_as_string(entry.get("district")),
        city: value_as_string(entry.get("city")),
        state: value_as_string(entry.get("state_code")).or_else(|| value_as_string(entry.get("state"))),
        country_code: country.to_string(),
        provider: "zipcodebase".to_string(),
    })
}
