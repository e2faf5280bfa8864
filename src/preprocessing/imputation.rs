//! Missing-value imputation: median/mode fill and round-robin regression.
//!
//! Numeric inputs are matrices with `NaN` marking missing cells.

#![allow(non_snake_case)]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::PrepError;
use crate::preprocessing::ridge::RidgeModel;
use crate::validation::outlier::quantile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputationStrategy {
    #[default]
    Simple,
    Iterative,
}

impl ImputationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Iterative => "iterative",
        }
    }
}

impl fmt::Display for ImputationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImputationStrategy {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "iterative" => Ok(Self::Iterative),
            other => Err(PrepError::configuration(format!("unknown imputation strategy '{other}'"))),
        }
    }
}

/// Order in which columns are visited in each round of iterative imputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputationOrder {
    /// Fewest missing values first.
    #[default]
    Ascending,
    /// Column order.
    Roman,
    /// Shuffled every round from the configured seed.
    Random,
}

/// Median of the non-NaN values, `None` if there are none.
pub fn nan_median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut present: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    Some(quantile(&present, 0.5))
}

/// Most frequent value; ties go to the lexicographically smallest.
pub fn column_mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
        .map(|(v, _)| v.to_string())
}

/// One regression step of a round: predict `target` from `predictors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationStep {
    pub target: usize,
    pub predictors: Vec<usize>,
    /// `None` when the column had too few observed values; the median fill stays.
    pub model: Option<RidgeModel>,
    pub min_value: f64,
    pub max_value: f64,
}

impl ImputationStep {
    fn apply(&self, filled: &mut Array2<f64>, missing_rows: &[usize]) {
        let Some(model) = &self.model else {
            return;
        };
        for &r in missing_rows {
            let row = filled.row(r);
            let inputs: Array1<f64> = self.predictors.iter().map(|&p| row[p]).collect();
            let predicted = model.predict_row(inputs.view());
            filled[[r, self.target]] = predicted.clamp(self.min_value, self.max_value);
        }
    }
}

/// Learned imputation parameters for the numeric block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputerState {
    pub strategy: ImputationStrategy,
    pub medians: Vec<f64>,
    pub rounds: Vec<Vec<ImputationStep>>,
    pub converged: bool,
}

fn missing_rows_by_column(X: &Array2<f64>) -> Vec<Vec<usize>> {
    X.axis_iter(Axis(1))
        .map(|col| {
            col.iter()
                .enumerate()
                .filter(|(_, v)| v.is_nan())
                .map(|(i, _)| i)
                .collect()
        })
        .collect()
}

impl ImputerState {
    pub fn fit(X: &Array2<f64>, columns: &[String], config: &PipelineConfig) -> Self {
        let medians: Vec<f64> = X
            .axis_iter(Axis(1))
            .zip(columns)
            .map(|(col, name)| {
                nan_median(col.iter().copied()).unwrap_or_else(|| {
                    tracing::warn!(column = %name, "no observed values; imputing 0.0");
                    0.0
                })
            })
            .collect();

        let mut state = Self {
            strategy: config.imputation_strategy,
            medians,
            rounds: Vec::new(),
            converged: true,
        };
        if config.imputation_strategy == ImputationStrategy::Iterative {
            state.fit_rounds(X, config);
        }
        state
    }

    fn fit_rounds(&mut self, X: &Array2<f64>, config: &PipelineConfig) {
        let n_cols = X.ncols();
        let missing = missing_rows_by_column(X);
        let mut targets: Vec<usize> = (0..n_cols)
            .filter(|&c| !missing[c].is_empty() && missing[c].len() < X.nrows())
            .collect();
        if targets.is_empty() || n_cols < 2 {
            return;
        }
        if config.imputation_order == ImputationOrder::Ascending {
            targets.sort_by_key(|&c| (missing[c].len(), c));
        }

        let observed_max = X.iter().filter(|v| !v.is_nan()).fold(0.0_f64, |m, v| m.max(v.abs()));
        let threshold = config.tolerance * observed_max.max(1.0);

        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let mut filled = self.fill_medians(X);
        self.converged = false;

        for iteration in 0..config.max_iter {
            if config.imputation_order == ImputationOrder::Random {
                targets.shuffle(&mut rng);
            }
            let previous = filled.clone();
            let mut steps = Vec::with_capacity(targets.len());

            for &target in &targets {
                let predictors: Vec<usize> = (0..n_cols).filter(|&c| c != target).collect();
                let observed: Vec<usize> = (0..X.nrows()).filter(|&r| !X[[r, target]].is_nan()).collect();

                let x_obs = filled.select(Axis(0), &observed).select(Axis(1), &predictors);
                let y_obs: Array1<f64> = observed.iter().map(|&r| filled[[r, target]]).collect();
                let (min_value, max_value) = y_obs
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

                let model = if observed.len() >= 2 {
                    RidgeModel::fit(&x_obs, &y_obs, config.ridge_alpha)
                } else {
                    None
                };
                let step = ImputationStep {
                    target,
                    predictors,
                    model,
                    min_value,
                    max_value,
                };
                step.apply(&mut filled, &missing[target]);
                steps.push(step);
            }
            self.rounds.push(steps);

            let change = (&filled - &previous)
                .iter()
                .fold(0.0_f64, |m, v| m.max(v.abs()));
            tracing::debug!(iteration, change, threshold, "imputation round finished");
            if change < threshold {
                self.converged = true;
                break;
            }
        }

        if !self.converged {
            tracing::warn!(
                max_iter = config.max_iter,
                "iterative imputation stopped before reaching tolerance"
            );
        }
    }

    fn fill_medians(&self, X: &Array2<f64>) -> Array2<f64> {
        let mut filled = X.clone();
        for (mut col, median) in filled.axis_iter_mut(Axis(1)).zip(&self.medians) {
            col.mapv_inplace(|v| if v.is_nan() { *median } else { v });
        }
        filled
    }

    /// Fill missing cells using only the stored parameters.
    pub fn transform(&self, X: &Array2<f64>) -> Result<Array2<f64>, PrepError> {
        if X.ncols() != self.medians.len() {
            return Err(PrepError::shape(format!(
                "imputer fitted on {} columns, got {}",
                self.medians.len(),
                X.ncols()
            )));
        }
        let missing = missing_rows_by_column(X);
        let mut filled = self.fill_medians(X);
        for round in &self.rounds {
            for step in round {
                step.apply(&mut filled, &missing[step.target]);
            }
        }
        Ok(filled)
    }

    pub fn n_iterations(&self) -> usize {
        self.rounds.len()
    }
}
