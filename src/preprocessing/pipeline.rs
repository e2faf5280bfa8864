//! Fit/transform feature pipeline with an immutable, shareable fit state.

#![allow(non_snake_case)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use ndarray::{concatenate, s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::error::{PrepError, Result};
use crate::preprocessing::categories::{categorize_feature, categorize_features, FeatureCategory};
use crate::preprocessing::feature_engineering::{FeatureEngineer, TemporalBaselines, DAYS_SINCE_LAST_VISIT};
use crate::preprocessing::imputation::{column_mode, ImputationStrategy, ImputerState};
use crate::preprocessing::normalization::{DataNormalizer, NormalizationMethod};
use crate::types::{as_date, as_number, as_subject, is_missing, ColumnKind, Dataset};
use crate::validation::PhiDetector;

/// Engineered feature matrix plus the identifiers needed to trace rows back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub feature_names: Vec<String>,
    pub subject_ids: Vec<Option<String>>,
    pub visit_dates: Vec<Option<NaiveDate>>,
    pub values: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub subject_id: Option<String>,
    pub visit_date: Option<NaiveDate>,
    pub features: Vec<f64>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values.column(i))
    }

    pub fn records(&self) -> Vec<FeatureRecord> {
        self.values
            .rows()
            .into_iter()
            .zip(self.subject_ids.iter().zip(&self.visit_dates))
            .map(|(row, (subject_id, visit_date))| FeatureRecord {
                subject_id: subject_id.clone(),
                visit_date: *visit_date,
                features: row.to_vec(),
            })
            .collect()
    }
}

/// Ordinal encoding of one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub column: String,
    /// Sorted distinct training values; the code is the index.
    pub vocabulary: Vec<String>,
    /// Substituted for missing and unseen values.
    pub mode: Option<String>,
}

impl CategoricalEncoding {
    fn fit(column: &str, values: &[Option<String>]) -> Self {
        let mut vocabulary: Vec<String> = values.iter().flatten().cloned().collect();
        vocabulary.sort_unstable();
        vocabulary.dedup();
        let mode = column_mode(values.iter().flatten().map(String::as_str));
        if mode.is_none() {
            tracing::warn!(column, "no observed categories; encoding as 0");
        }
        Self {
            column: column.to_string(),
            vocabulary,
            mode,
        }
    }

    fn code_of(&self, value: &str) -> Option<usize> {
        self.vocabulary.binary_search_by(|v| v.as_str().cmp(value)).ok()
    }

    pub fn encode(&self, value: Option<&str>) -> f64 {
        value
            .and_then(|v| self.code_of(v))
            .or_else(|| self.mode.as_deref().and_then(|m| self.code_of(m)))
            .unwrap_or(0) as f64
    }
}

/// Statistics of the training data kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProfile {
    pub n_rows: usize,
    pub n_subjects: usize,
    pub multi_visit_subjects: usize,
    pub missing_by_feature: BTreeMap<String, usize>,
}

/// Everything learned by `fit`. Never modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    config: PipelineConfig,
    patient_id_col: String,
    visit_date_col: String,
    numeric_columns: Vec<String>,
    imputer: ImputerState,
    normalizer: DataNormalizer,
    categorical: Vec<CategoricalEncoding>,
    temporal: Option<TemporalBaselines>,
    feature_names: Vec<String>,
    training_profile: TrainingProfile,
}

fn label(value: &Value) -> Option<String> {
    as_subject(value)
}

fn numeric_matrix(dataset: &Dataset, indices: &[usize]) -> Array2<f64> {
    let mut X = Array2::from_elem((dataset.n_rows(), indices.len()), f64::NAN);
    for (r, row) in dataset.rows().iter().enumerate() {
        for (c, &idx) in indices.iter().enumerate() {
            if let Some(v) = as_number(&row[idx]) {
                X[[r, c]] = v;
            }
        }
    }
    X
}

fn resolve(dataset: &Dataset, columns: &[String]) -> Result<Vec<usize>> {
    columns.iter().map(|c| dataset.require_column(c)).collect()
}

impl FitState {
    /// Learn all parameters from `dataset`. Pure: nothing outside the returned value changes.
    pub fn fit(dataset: &Dataset, patient_id_col: &str, visit_date_col: &str, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pid = dataset.require_column(patient_id_col)?;
        let visit = dataset.require_column(visit_date_col)?;
        if dataset.is_empty() {
            return Err(PrepError::shape("cannot fit the pipeline on an empty dataset"));
        }

        let phi_columns = PhiDetector::default().phi_columns(dataset, &[patient_id_col, visit_date_col]);
        let mut numeric_columns = Vec::new();
        let mut categorical_columns = Vec::new();
        for (idx, col) in dataset.columns().iter().enumerate() {
            if idx == pid || idx == visit {
                continue;
            }
            if phi_columns.contains(&col.name) {
                tracing::warn!(column = %col.name, "direct identifier column excluded from features");
                continue;
            }
            match col.kind {
                ColumnKind::Numeric => numeric_columns.push(col.name.clone()),
                ColumnKind::Categorical => categorical_columns.push(col.name.clone()),
                ColumnKind::Identifier | ColumnKind::Temporal | ColumnKind::FreeText => {
                    tracing::debug!(column = %col.name, kind = ?col.kind, "column excluded from features");
                }
            }
        }
        if numeric_columns.is_empty() && categorical_columns.is_empty() && !config.include_temporal {
            return Err(PrepError::shape("dataset has no usable feature columns"));
        }

        let numeric_idx = resolve(dataset, &numeric_columns)?;
        let X = numeric_matrix(dataset, &numeric_idx);
        let imputer = ImputerState::fit(&X, &numeric_columns, config);
        let imputed = imputer.transform(&X)?;
        let normalizer = DataNormalizer::fit(&imputed, config.normalization_method)?;

        let categorical = categorical_columns
            .iter()
            .map(|name| {
                let idx = dataset.require_column(name)?;
                let values: Vec<Option<String>> = dataset.column_values(idx).map(label).collect();
                Ok(CategoricalEncoding::fit(name, &values))
            })
            .collect::<Result<Vec<_>>>()?;

        let subjects: Vec<Option<String>> = dataset.column_values(pid).map(as_subject).collect();
        let dates: Vec<Option<NaiveDate>> = dataset.column_values(visit).map(as_date).collect();

        let temporal = if config.include_temporal {
            let score_columns = match &config.temporal_score_columns {
                Some(cols) => {
                    if let Some(bad) = cols.iter().find(|c| !numeric_columns.contains(c)) {
                        return Err(PrepError::configuration(format!(
                            "temporal score column '{bad}' is not a numeric feature column"
                        )));
                    }
                    cols.clone()
                }
                None => numeric_columns
                    .iter()
                    .filter(|c| categorize_feature(c) == FeatureCategory::Cognitive)
                    .cloned()
                    .collect(),
            };
            Some(FeatureEngineer::fit_baselines(&subjects, &dates, score_columns))
        } else {
            None
        };

        let mut feature_names = numeric_columns.clone();
        feature_names.extend(categorical_columns.iter().cloned());
        if let Some(t) = &temporal {
            feature_names.extend(t.feature_names());
        }

        let mut visits_per_subject: BTreeMap<&str, usize> = BTreeMap::new();
        for subject in subjects.iter().flatten() {
            *visits_per_subject.entry(subject.as_str()).or_insert(0) += 1;
        }
        let mut missing_by_feature = BTreeMap::new();
        for name in numeric_columns.iter().chain(&categorical_columns) {
            let idx = dataset.require_column(name)?;
            let missing = dataset.column_values(idx).filter(|v| is_missing(v)).count();
            missing_by_feature.insert(name.clone(), missing);
        }
        let training_profile = TrainingProfile {
            n_rows: dataset.n_rows(),
            n_subjects: visits_per_subject.len(),
            multi_visit_subjects: visits_per_subject.values().filter(|n| **n >= 2).count(),
            missing_by_feature,
        };

        tracing::info!(
            rows = dataset.n_rows(),
            numeric = numeric_columns.len(),
            categorical = categorical_columns.len(),
            features = feature_names.len(),
            imputation = %config.imputation_strategy,
            normalization = %config.normalization_method,
            "pipeline fitted"
        );

        Ok(Self {
            config: config.clone(),
            patient_id_col: patient_id_col.to_string(),
            visit_date_col: visit_date_col.to_string(),
            numeric_columns,
            imputer,
            normalizer,
            categorical,
            temporal,
            feature_names,
            training_profile,
        })
    }

    /// Apply the stored parameters to `dataset` without learning anything from it.
    pub fn transform(&self, dataset: &Dataset) -> Result<FeatureTable> {
        let pid = dataset.require_column(&self.patient_id_col)?;
        let visit = dataset.require_column(&self.visit_date_col)?;

        let numeric_idx = resolve(dataset, &self.numeric_columns)?;
        let X = numeric_matrix(dataset, &numeric_idx);
        let imputed = self.imputer.transform(&X)?;
        let normalized = self.normalizer.transform(&imputed)?;

        let mut codes = Array2::zeros((dataset.n_rows(), self.categorical.len()));
        for (c, encoding) in self.categorical.iter().enumerate() {
            let idx = dataset.require_column(&encoding.column)?;
            for (r, value) in dataset.column_values(idx).enumerate() {
                codes[[r, c]] = encoding.encode(label(value).as_deref());
            }
        }

        let subject_ids: Vec<Option<String>> = dataset.column_values(pid).map(as_subject).collect();
        let visit_dates: Vec<Option<NaiveDate>> = dataset.column_values(visit).map(as_date).collect();

        let temporal = match &self.temporal {
            Some(baselines) => {
                let positions: Vec<usize> = baselines
                    .score_columns
                    .iter()
                    .filter_map(|s| self.numeric_columns.iter().position(|c| c == s))
                    .collect();
                let scores = imputed.select(Axis(1), &positions);
                FeatureEngineer::extract_temporal_features(&subject_ids, &visit_dates, scores.view(), baselines)
            }
            None => Array2::zeros((dataset.n_rows(), 0)),
        };

        let values = concatenate(Axis(1), &[normalized.view(), codes.view(), temporal.view()])
            .map_err(|e| PrepError::shape(format!("failed to assemble feature matrix: {e}")))?;

        tracing::debug!(rows = values.nrows(), features = values.ncols(), "features transformed");
        Ok(FeatureTable {
            feature_names: self.feature_names.clone(),
            subject_ids,
            visit_dates,
            values,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn patient_id_col(&self) -> &str {
        &self.patient_id_col
    }

    pub fn visit_date_col(&self) -> &str {
        &self.visit_date_col
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn imputer(&self) -> &ImputerState {
        &self.imputer
    }

    pub fn normalizer(&self) -> &DataNormalizer {
        &self.normalizer
    }

    pub fn categorical(&self) -> &[CategoricalEncoding] {
        &self.categorical
    }

    pub fn temporal(&self) -> Option<&TemporalBaselines> {
        self.temporal.as_ref()
    }

    pub fn training_profile(&self) -> &TrainingProfile {
        &self.training_profile
    }

    fn temporal_feature_names(&self) -> Vec<String> {
        self.temporal.as_ref().map(|t| t.feature_names()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub n_training_rows: usize,
    pub n_subjects: usize,
    pub n_features: usize,
    pub n_numeric: usize,
    pub n_categorical: usize,
    pub n_temporal: usize,
    pub imputation_strategy: ImputationStrategy,
    pub imputation_iterations: usize,
    pub imputation_converged: bool,
    pub normalization_method: NormalizationMethod,
    pub include_temporal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDataSummary {
    pub total_missing: usize,
    pub missing_fraction: f64,
    pub features_with_missing: usize,
    pub missing_by_feature: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReport {
    pub summary: FeatureSummary,
    pub missing_data: MissingDataSummary,
    pub feature_types: BTreeMap<FeatureCategory, Vec<String>>,
}

impl fmt::Display for FeatureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "FEATURE ENGINEERING REPORT")?;
        writeln!(f, "==========================")?;
        writeln!(f)?;
        writeln!(f, "Summary")?;
        writeln!(f, "  training rows:        {}", s.n_training_rows)?;
        writeln!(f, "  subjects:             {}", s.n_subjects)?;
        writeln!(
            f,
            "  features:             {} ({} numeric, {} categorical, {} temporal)",
            s.n_features, s.n_numeric, s.n_categorical, s.n_temporal
        )?;
        writeln!(
            f,
            "  imputation:           {} ({} rounds, converged: {})",
            s.imputation_strategy, s.imputation_iterations, s.imputation_converged
        )?;
        writeln!(f, "  normalization:        {}", s.normalization_method)?;
        writeln!(f, "  temporal features:    {}", s.include_temporal)?;
        writeln!(f)?;

        let m = &self.missing_data;
        writeln!(f, "Missing data (training)")?;
        writeln!(
            f,
            "  total missing cells:  {} ({:.1}%)",
            m.total_missing,
            m.missing_fraction * 100.0
        )?;
        for (feature, count) in m.missing_by_feature.iter().filter(|(_, n)| **n > 0) {
            writeln!(f, "  {feature}: {count}")?;
        }
        writeln!(f)?;

        writeln!(f, "Feature types")?;
        for (category, names) in &self.feature_types {
            if names.is_empty() {
                writeln!(f, "  {category}: -")?;
            } else {
                writeln!(f, "  {category}: {}", names.join(", "))?;
            }
        }
        Ok(())
    }
}

pub type PipelineChecks = BTreeMap<String, BTreeMap<String, bool>>;

pub struct FeatureEngineeringPipeline {
    config: PipelineConfig,
    state: Option<Arc<FitState>>,
}

impl FeatureEngineeringPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, state: None })
    }

    /// Inference-only pipeline around a previously learned state.
    pub fn from_fit_state(state: FitState) -> Self {
        Self {
            config: state.config.clone(),
            state: Some(Arc::new(state)),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fit(&self, dataset: &Dataset, patient_id_col: &str, visit_date_col: &str) -> Result<FitState> {
        FitState::fit(dataset, patient_id_col, visit_date_col, &self.config)
    }

    /// Fit on `dataset`, store the state and return the transformed training features.
    pub fn fit_transform(&mut self, dataset: &Dataset, patient_id_col: &str, visit_date_col: &str) -> Result<FeatureTable> {
        let state = Arc::new(self.fit(dataset, patient_id_col, visit_date_col)?);
        let table = state.transform(dataset)?;
        self.state = Some(state);
        Ok(table)
    }

    pub fn transform(&self, dataset: &Dataset) -> Result<FeatureTable> {
        self.state()?.transform(dataset)
    }

    pub fn transform_with(&self, dataset: &Dataset, state: &FitState) -> Result<FeatureTable> {
        state.transform(dataset)
    }

    pub fn fit_state(&self) -> Option<Arc<FitState>> {
        self.state.clone()
    }

    fn state(&self) -> Result<&FitState> {
        self.state.as_deref().ok_or_else(PrepError::not_fitted)
    }

    pub fn get_feature_report(&self) -> Result<FeatureReport> {
        let state = self.state()?;
        let profile = &state.training_profile;

        let total_missing: usize = profile.missing_by_feature.values().sum();
        let cells = profile.n_rows * profile.missing_by_feature.len();
        let missing_data = MissingDataSummary {
            total_missing,
            missing_fraction: if cells == 0 { 0.0 } else { total_missing as f64 / cells as f64 },
            features_with_missing: profile.missing_by_feature.values().filter(|n| **n > 0).count(),
            missing_by_feature: profile.missing_by_feature.clone(),
        };

        let mut feature_types = categorize_features(&state.feature_names);
        // Engineered visit features are always temporal, whatever their name.
        let temporal_names = state.temporal_feature_names();
        for names in feature_types.values_mut() {
            names.retain(|n| !temporal_names.contains(n));
        }
        feature_types
            .entry(FeatureCategory::Temporal)
            .or_default()
            .extend(temporal_names.iter().cloned());

        let summary = FeatureSummary {
            n_training_rows: profile.n_rows,
            n_subjects: profile.n_subjects,
            n_features: state.feature_names.len(),
            n_numeric: state.numeric_columns.len(),
            n_categorical: state.categorical.len(),
            n_temporal: temporal_names.len(),
            imputation_strategy: state.imputer.strategy,
            imputation_iterations: state.imputer.n_iterations(),
            imputation_converged: state.imputer.converged,
            normalization_method: state.normalizer.method(),
            include_temporal: state.temporal.is_some(),
        };

        Ok(FeatureReport {
            summary,
            missing_data,
            feature_types,
        })
    }

    /// Structural checks over an engineered feature table.
    pub fn validate_pipeline(&self, features: &FeatureTable) -> Result<PipelineChecks> {
        let state = self.state()?;
        let mut checks = PipelineChecks::new();

        let excluded = [state.patient_id_col.as_str(), state.visit_date_col.as_str()];
        let schema = checks.entry("schema".to_string()).or_default();
        schema.insert("feature_names_match_fit".to_string(), features.feature_names == state.feature_names);
        schema.insert(
            "row_identifiers_aligned".to_string(),
            features.subject_ids.len() == features.n_rows() && features.visit_dates.len() == features.n_rows(),
        );
        schema.insert("column_count_matches".to_string(), features.n_features() == features.feature_names.len());
        schema.insert(
            "no_identifier_columns".to_string(),
            !features.feature_names.iter().any(|n| excluded.contains(&n.as_str())),
        );

        let imputation = checks.entry("imputation".to_string()).or_default();
        imputation.insert("no_missing_values".to_string(), features.values.iter().all(|v| v.is_finite()));

        let n_numeric = state.numeric_columns.len().min(features.n_features());
        let numeric_block = features.values.slice(s![.., ..n_numeric]);
        let within_scale = match state.normalizer.method() {
            NormalizationMethod::Standard => numeric_block.iter().all(|v| v.abs() <= 10.0),
            NormalizationMethod::MinMax => numeric_block.iter().all(|v| (-1e-9..=1.0 + 1e-9).contains(v)),
            NormalizationMethod::None => true,
        };
        let normalization = checks.entry("normalization".to_string()).or_default();
        normalization.insert("values_within_expected_scale".to_string(), within_scale);

        let temporal_names = state.temporal_feature_names();
        let present: Vec<&String> = features
            .feature_names
            .iter()
            .filter(|n| temporal_names.contains(n))
            .collect();
        let matches_config = if state.temporal.is_some() {
            present.len() == temporal_names.len()
        } else {
            present.is_empty()
        };

        let mut visit_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for subject in features.subject_ids.iter().flatten() {
            *visit_counts.entry(subject.as_str()).or_insert(0) += 1;
        }
        let single_visit_zeroed = match features.column(DAYS_SINCE_LAST_VISIT) {
            Some(gaps) => features
                .subject_ids
                .iter()
                .zip(gaps.iter())
                .all(|(subject, gap)| match subject {
                    Some(s) if visit_counts.get(s.as_str()) == Some(&1) => *gap == 0.0,
                    _ => true,
                }),
            None => true,
        };
        let temporal = checks.entry("temporal".to_string()).or_default();
        temporal.insert("temporal_columns_match_config".to_string(), matches_config);
        temporal.insert("single_visit_subjects_zeroed".to_string(), single_visit_zeroed);

        let failed: Vec<String> = checks
            .iter()
            .flat_map(|(component, c)| {
                c.iter()
                    .filter(|(_, ok)| !**ok)
                    .map(move |(name, _)| format!("{component}.{name}"))
            })
            .collect();
        if failed.is_empty() {
            tracing::debug!("pipeline checks passed");
        } else {
            tracing::warn!(failed = ?failed, "pipeline checks failed");
        }
        Ok(checks)
    }

    /// Write the rendered feature report to `path`.
    pub fn save_feature_documentation(&self, path: impl AsRef<Path>) -> Result<()> {
        let report = self.get_feature_report()?;
        std::fs::write(path.as_ref(), report.to_string())?;
        tracing::info!(path = %path.as_ref().display(), "feature documentation written");
        Ok(())
    }
}
