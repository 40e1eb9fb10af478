//! HTTP API handlers for mdm-hub

pub mod health;
pub mod llm;
pub mod process;

pub use health::health_routes;
pub use llm::llm_routes;
pub use process::process_routes;
