//! Feature engineering: imputation, normalization and longitudinal features.

pub mod categories;
pub mod feature_engineering;
pub mod imputation;
pub mod normalization;
pub mod pipeline;
pub mod ridge;

pub use categories::{categorize_feature, categorize_features, FeatureCategory};
pub use feature_engineering::{FeatureEngineer, TemporalBaselines};
pub use imputation::{ImputationOrder, ImputationStrategy, ImputerState};
pub use normalization::{ColumnScaler, DataNormalizer, NormalizationMethod};
pub use pipeline::{FeatureEngineeringPipeline, FeatureRecord, FeatureReport, FeatureTable, FitState};
