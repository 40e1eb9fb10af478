//! Data models produced inside a batch

pub mod normalized;

pub use normalized::{NormalizationMethod, NormalizedRecord};
