//! Services beyond the linkage core: enrichment, harmonization, masking,
//! plausibility checks

pub mod harmonize;
pub mod masking;
pub mod outlier;
pub mod postal;

pub use harmonize::{HarmonizationChange, HarmonizationReport, Subject};
pub use masking::{MaskedValue, PiiMask};
pub use postal::{PostalInfo, PostalLookup};
