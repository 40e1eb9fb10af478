//! # MDM Common Library
//!
//! Shared code for the master-data consolidation workspace:
//! - Record data model (raw records, parsed addresses, issues)
//! - Common error type
//! - Configuration file discovery and environment helpers
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;
pub mod records;

pub use error::{Error, Result};
pub use records::{Domain, Issue, Operation, ParsedAddress, RawRecord, Severity};
