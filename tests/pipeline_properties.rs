//! Train/inference parity and output shape of the feature pipeline.

use cohort_prep::{
    Dataset, FeatureEngineeringPipeline, FitState, ImputationStrategy, NormalizationMethod, PipelineConfig, PrepError,
};
use ndarray::Axis;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const TEMPORAL: [&str; 4] = [
    "visit_index",
    "days_since_baseline",
    "days_since_last_visit",
    "mmse_rate_of_change",
];

const DIAGNOSES: [&str; 3] = ["CN", "MCI", "AD"];

fn training_rows() -> Vec<Vec<Value>> {
    let mut rows = Vec::new();
    for s in 0..8 {
        for v in 0..3 {
            let mmse = if (s + v) % 5 == 0 { Value::Null } else { json!(30 - v - s % 4) };
            let hippocampus = if (s * 3 + v) % 7 == 0 { Value::Null } else { json!(7000 - 150 * v - 40 * s) };
            rows.push(vec![
                json!(format!("T{s}")),
                json!(format!("20{:02}-0{}-10", 18 + v, 1 + s % 9)),
                json!(60 + s),
                json!(12 + s % 6),
                mmse,
                hippocampus,
                json!(DIAGNOSES[(s + v) % 3]),
            ]);
        }
    }
    // A subject seen only once
    rows.push(vec![
        json!("SOLO"),
        json!("2019-05-05"),
        json!(77),
        json!(16),
        json!(24),
        json!(6100),
        json!("MCI"),
    ]);
    rows
}

fn names() -> [&'static str; 7] {
    ["subject_id", "visit_date", "age", "education_years", "mmse", "hippocampus", "diagnosis"]
}

fn training() -> Dataset {
    Dataset::from_rows(&names(), training_rows()).unwrap()
}

fn holdout() -> Dataset {
    Dataset::from_rows(
        &names(),
        vec![
            vec![json!("H1"), json!("2022-02-02"), json!(90), json!(8), json!(null), json!(5200), json!("AD")],
            vec![json!("H1"), json!("2023-02-02"), json!(91), json!(8), json!(15), json!(null), json!("AD")],
            vec![json!("T0"), json!("2022-01-10"), json!(64), json!(12), json!(26), json!(6500), json!("unknown")],
        ],
    )
    .unwrap()
}

fn config(imputation: &str, normalization: &str, include_temporal: bool) -> PipelineConfig {
    PipelineConfig::from_names(imputation, normalization, include_temporal).unwrap()
}

#[test]
fn transform_reproduces_fit_transform_exactly() {
    for imputation in ["simple", "iterative"] {
        for normalization in ["standard", "minmax", "none"] {
            let mut pipeline = FeatureEngineeringPipeline::new(config(imputation, normalization, true)).unwrap();
            let fitted = pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
            let replayed = pipeline.transform(&training()).unwrap();
            assert_eq!(fitted, replayed, "{imputation}/{normalization}");
        }
    }
}

#[test]
fn transform_never_touches_fit_state() {
    let mut pipeline = FeatureEngineeringPipeline::new(config("iterative", "standard", true)).unwrap();
    pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
    let before = (*pipeline.fit_state().unwrap()).clone();

    let features = pipeline.transform(&holdout()).unwrap();
    assert_eq!(features.n_rows(), 3);
    assert!(features.values.iter().all(|v| v.is_finite()));

    let after = pipeline.fit_state().unwrap();
    assert_eq!(before, *after);
}

#[test]
fn standard_scaling_centers_training_columns() {
    for strategy in [ImputationStrategy::Simple, ImputationStrategy::Iterative] {
        let cfg = PipelineConfig {
            imputation_strategy: strategy,
            normalization_method: NormalizationMethod::Standard,
            ..PipelineConfig::default()
        };
        let mut pipeline = FeatureEngineeringPipeline::new(cfg).unwrap();
        let table = pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();

        for name in ["age", "education_years", "mmse", "hippocampus"] {
            let col = table.column(name).unwrap();
            assert!(col.mean().unwrap().abs() < 1e-9, "{name} mean");
            assert!((col.std(0.0) - 1.0).abs() < 1e-9, "{name} std");
        }
    }
}

#[test]
fn minmax_keeps_training_values_in_unit_interval() {
    let mut pipeline = FeatureEngineeringPipeline::new(config("iterative", "minmax", false)).unwrap();
    let table = pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
    let state = pipeline.fit_state().unwrap();
    let n_numeric = state.numeric_columns().len();
    for col in table.values.axis_iter(Axis(1)).take(n_numeric) {
        assert!(col.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn single_visit_subject_gets_zero_temporal_features() {
    let mut pipeline = FeatureEngineeringPipeline::new(config("simple", "standard", true)).unwrap();
    let table = pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();

    let solo = table
        .subject_ids
        .iter()
        .position(|s| s.as_deref() == Some("SOLO"))
        .unwrap();
    for name in TEMPORAL {
        assert_eq!(table.column(name).unwrap()[solo], 0.0, "{name}");
    }

    let checks = pipeline.validate_pipeline(&table).unwrap();
    assert!(checks["temporal"]["single_visit_subjects_zeroed"]);
    assert!(checks["temporal"]["temporal_columns_match_config"]);
}

#[test]
fn temporal_columns_absent_when_disabled() {
    let mut pipeline = FeatureEngineeringPipeline::new(config("simple", "standard", false)).unwrap();
    let table = pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
    for name in TEMPORAL {
        assert!(table.column(name).is_none(), "{name} present");
    }
    assert_eq!(
        table.feature_names,
        vec!["age", "education_years", "mmse", "hippocampus", "diagnosis"]
    );
    let report = pipeline.get_feature_report().unwrap();
    assert!(!report.summary.include_temporal);
    assert!(report.feature_types[&cohort_prep::FeatureCategory::Temporal].is_empty());
}

#[test]
fn missing_feature_column_at_transform_is_shape_error() {
    let mut pipeline = FeatureEngineeringPipeline::new(PipelineConfig::default()).unwrap();
    pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();

    let narrow = Dataset::from_rows(
        &["subject_id", "visit_date", "age"],
        vec![vec![json!("T1"), json!("2020-01-01"), json!(70)]],
    )
    .unwrap();
    match pipeline.transform(&narrow) {
        Err(PrepError::DataShape { column, .. }) => assert_eq!(column.as_deref(), Some("education_years")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn unknown_strategy_is_configuration_error() {
    assert!(matches!(
        PipelineConfig::from_names("knn", "standard", true),
        Err(PrepError::Configuration(_))
    ));
    assert!(matches!(
        PipelineConfig::from_names("simple", "robust", true),
        Err(PrepError::Configuration(_))
    ));
}

#[test]
fn saved_fit_state_drives_a_fresh_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fit_state.json");

    let mut pipeline = FeatureEngineeringPipeline::new(config("iterative", "standard", true)).unwrap();
    pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
    pipeline.fit_state().unwrap().save(&path).unwrap();

    let restored = FeatureEngineeringPipeline::from_fit_state(FitState::load(&path).unwrap());
    let expected = pipeline.transform(&holdout()).unwrap();
    let actual = restored.transform(&holdout()).unwrap();
    assert_eq!(expected.feature_names, actual.feature_names);
    for (a, b) in expected.values.iter().zip(actual.values.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn feature_documentation_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feature_report.txt");

    let mut pipeline = FeatureEngineeringPipeline::new(PipelineConfig::default()).unwrap();
    pipeline.fit_transform(&training(), "subject_id", "visit_date").unwrap();
    pipeline.save_feature_documentation(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Missing data"));
    assert!(text.contains("mmse"));
    assert!(text.contains("imaging: hippocampus"));
    assert!(text.contains("cognitive: mmse"));
}

#[test]
fn saved_fit_state_carries_no_direct_identifiers() {
    let mut rows = training_rows();
    for (i, row) in rows.iter_mut().enumerate() {
        row.push(json!(format!("p{}@clinic.org", i % 4)));
    }
    let mut columns = names().to_vec();
    columns.push("contact");
    let ds = Dataset::from_rows(&columns, rows).unwrap();

    let mut pipeline = FeatureEngineeringPipeline::new(PipelineConfig::default()).unwrap();
    let table = pipeline.fit_transform(&ds, "subject_id", "visit_date").unwrap();
    assert!(table.column("contact").is_none());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fit_state.json");
    pipeline.fit_state().unwrap().save(&path).unwrap();
    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(!saved.contains("@clinic.org"));
    assert!(!saved.contains("\"contact\""));
}
