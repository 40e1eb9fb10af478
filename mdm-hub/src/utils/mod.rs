//! Utility modules

pub mod json_salvage;
pub mod text;

pub use json_salvage::{extract_json_object, value_as_string};
