//! Cohort Prep: validation gate and feature pipeline for longitudinal clinical datasets.

pub mod config;
pub mod error;
pub mod preprocessing;
pub mod types;
pub mod validation;

pub use config::{PipelineConfig, PrepConfig, QualityWeights, ValidationConfig};
pub use error::{PrepError, Result};
pub use preprocessing::*;
pub use types::*;
pub use validation::*;
