//! Longitudinal features derived from each subject's visit sequence.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.25;

pub const VISIT_INDEX: &str = "visit_index";
pub const DAYS_SINCE_BASELINE: &str = "days_since_baseline";
pub const DAYS_SINCE_LAST_VISIT: &str = "days_since_last_visit";

/// Per-subject baseline dates learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalBaselines {
    pub baselines: BTreeMap<String, NaiveDate>,
    /// Numeric columns that get a rate-of-change feature.
    pub score_columns: Vec<String>,
}

impl TemporalBaselines {
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = vec![
            VISIT_INDEX.to_string(),
            DAYS_SINCE_BASELINE.to_string(),
            DAYS_SINCE_LAST_VISIT.to_string(),
        ];
        names.extend(self.score_columns.iter().map(|c| format!("{c}_rate_of_change")));
        names
    }
}

pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Earliest visit date per subject.
    pub fn fit_baselines(
        subjects: &[Option<String>],
        dates: &[Option<NaiveDate>],
        score_columns: Vec<String>,
    ) -> TemporalBaselines {
        let mut baselines: BTreeMap<String, NaiveDate> = BTreeMap::new();
        for (subject, date) in subjects.iter().zip(dates) {
            if let (Some(subject), Some(date)) = (subject, date) {
                baselines
                    .entry(subject.clone())
                    .and_modify(|b| *b = (*b).min(*date))
                    .or_insert(*date);
            }
        }
        TemporalBaselines {
            baselines,
            score_columns,
        }
    }

    /// Extract temporal features row by row.
    ///
    /// `scores` holds one column per entry of `baselines.score_columns`, aligned with rows.
    /// Visits are ordered by date within each subject; rows without a subject or date,
    /// and first visits, get zeros.
    pub fn extract_temporal_features(
        subjects: &[Option<String>],
        dates: &[Option<NaiveDate>],
        scores: ArrayView2<f64>,
        baselines: &TemporalBaselines,
    ) -> Array2<f64> {
        let n_samples = subjects.len();
        let n_features = 3 + baselines.score_columns.len();
        let mut features = Array2::zeros((n_samples, n_features));

        let mut by_subject: BTreeMap<&str, Vec<(NaiveDate, usize)>> = BTreeMap::new();
        for (row, (subject, date)) in subjects.iter().zip(dates).enumerate() {
            if let (Some(subject), Some(date)) = (subject, date) {
                by_subject.entry(subject.as_str()).or_default().push((*date, row));
            }
        }

        for (subject, mut visits) in by_subject {
            visits.sort_unstable();
            let baseline = baselines
                .baselines
                .get(subject)
                .copied()
                .unwrap_or(visits[0].0);

            for (k, &(date, row)) in visits.iter().enumerate() {
                features[[row, 0]] = k as f64;
                features[[row, 1]] = (date - baseline).num_days() as f64;

                if k == 0 {
                    continue;
                }
                let (prev_date, prev_row) = visits[k - 1];
                let gap_days = (date - prev_date).num_days();
                features[[row, 2]] = gap_days as f64;

                if gap_days > 0 {
                    let years = gap_days as f64 / DAYS_PER_YEAR;
                    for s in 0..baselines.score_columns.len() {
                        features[[row, 3 + s]] = (scores[[row, s]] - scores[[prev_row, s]]) / years;
                    }
                }
            }
        }

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn d(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_visit_sequence_features() {
        let subjects = vec![s("S1"), s("S1"), s("S2")];
        let dates = vec![d("2021-01-01"), d("2020-01-01"), d("2020-06-01")];
        let scores = array![[24.0], [28.0], [30.0]];
        let baselines = FeatureEngineer::fit_baselines(&subjects, &dates, vec!["mmse".to_string()]);
        assert_eq!(baselines.baselines["S1"], d("2020-01-01").unwrap());

        let f = FeatureEngineer::extract_temporal_features(&subjects, &dates, scores.view(), &baselines);
        // Row 1 is S1's first visit, row 0 the second.
        assert_eq!(f.row(1).to_vec(), vec![0.0, 0.0, 0.0, 0.0]);
        assert_eq!(f[[0, 0]], 1.0);
        assert_eq!(f[[0, 1]], 366.0);
        assert_eq!(f[[0, 2]], 366.0);
        assert!((f[[0, 3]] - (-4.0 / (366.0 / DAYS_PER_YEAR))).abs() < 1e-12);
        // Single-visit subject
        assert_eq!(f.row(2).to_vec(), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unseen_subject_uses_own_first_visit() {
        let baselines = FeatureEngineer::fit_baselines(&[s("S1")], &[d("2020-01-01")], Vec::new());
        let subjects = vec![s("S9"), s("S9"), s("S1")];
        let dates = vec![d("2022-01-01"), d("2022-01-11"), d("2020-01-31")];
        let scores = Array2::zeros((3, 0));
        let f = FeatureEngineer::extract_temporal_features(&subjects, &dates, scores.view(), &baselines);
        assert_eq!(f[[1, 1]], 10.0);
        assert_eq!(f[[2, 1]], 30.0);
        assert_eq!(f[[2, 0]], 0.0);
    }

    #[test]
    fn test_missing_date_rows_are_zero() {
        let baselines = FeatureEngineer::fit_baselines(&[], &[], Vec::new());
        let f = FeatureEngineer::extract_temporal_features(
            &[s("S1"), None],
            &[None, d("2020-01-01")],
            Array2::zeros((2, 0)).view(),
            &baselines,
        );
        assert!(f.iter().all(|v| *v == 0.0));
        assert_eq!(baselines.feature_names().len(), 3);
    }
}
