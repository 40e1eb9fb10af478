//! mdm-hub library interface
//!
//! Master-data consolidation service: normalizes customer records through a
//! pool of inference endpoints (with deterministic rules as fallback),
//! validates them, links duplicates and builds golden records.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod matching;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod services;
pub mod utils;
pub mod validators;

pub use crate::error::{ApiError, ApiResult};

use crate::config::HubConfig;
use crate::dispatcher::BackendPool;
use crate::normalizer::{FieldNormalizer, PromptTemplates};
use crate::pipeline::PipelineCoordinator;
use crate::services::PostalLookup;
use axum::Router;
use chrono::{DateTime, Utc};
use mdm_common::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    /// Inference endpoints shared by every batch
    pub pool: Arc<BackendPool>,
    pub coordinator: Arc<PipelineCoordinator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Build the production state: Ollama-backed pool, prompt templates from
    /// `inference.prompt_dir`, postal lookup when enabled.
    pub fn from_config(config: HubConfig) -> Result<Self> {
        let pool = BackendPool::from_config(&config.inference, &config.dispatcher)
            .map_err(|e| Error::Config(format!("Inference client setup failed: {}", e)))?;
        Self::with_pool(config, Arc::new(pool))
    }

    /// Build the state around an existing pool
    pub fn with_pool(config: HubConfig, pool: Arc<BackendPool>) -> Result<Self> {
        let prompts = PromptTemplates::load(config.inference.prompt_dir.as_deref())?;
        let normalizer = FieldNormalizer::new(Arc::clone(&pool), prompts, &config.inference);

        let postal = if config.postal.enabled {
            info!(
                zipcodebase = config.postal.zipcodebase_key.is_some(),
                max_concurrency = config.postal.max_concurrency,
                "Postal lookup enabled"
            );
            Some(PostalLookup::new(&config.postal)?)
        } else {
            None
        };

        let coordinator = PipelineCoordinator::new(
            normalizer,
            config.matching.clone(),
            config.pipeline.clone(),
            postal,
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            coordinator: Arc::new(coordinator),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::llm_routes())
        .merge(api::process_routes())
        .with_state(state)
}
