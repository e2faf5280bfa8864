//! Per-column scaling learned on training data.

#![allow(non_snake_case)]

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMethod {
    #[default]
    Standard,
    MinMax,
    None,
}

impl NormalizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::MinMax => "minmax",
            Self::None => "none",
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationMethod {
    type Err = PrepError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "zscore" => Ok(Self::Standard),
            "minmax" | "min_max" => Ok(Self::MinMax),
            "none" => Ok(Self::None),
            other => Err(PrepError::configuration(format!("unknown normalization method '{other}'"))),
        }
    }
}

/// Scaling parameters for one column. Degenerate columns map to 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnScaler {
    Standard { mean: f64, std: f64 },
    MinMax { min: f64, max: f64 },
    Identity,
}

impl ColumnScaler {
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            Self::Standard { mean, std } => {
                if std < 1e-10 {
                    0.0
                } else {
                    (value - mean) / std
                }
            }
            Self::MinMax { min, max } => {
                let range = max - min;
                if range < 1e-10 {
                    0.0
                } else {
                    (value - min) / range
                }
            }
            Self::Identity => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNormalizer {
    method: NormalizationMethod,
    scalers: Vec<ColumnScaler>,
}

impl DataNormalizer {
    /// Learn per-column parameters; `X` must have no missing cells.
    pub fn fit(X: &Array2<f64>, method: NormalizationMethod) -> Result<Self> {
        if X.nrows() == 0 {
            return Err(PrepError::shape("cannot fit normalizer on zero rows"));
        }

        let scalers = match method {
            NormalizationMethod::Standard => {
                let mean = X
                    .mean_axis(Axis(0))
                    .ok_or_else(|| PrepError::shape("failed to compute column means"))?;
                // Population standard deviation
                let std = X.std_axis(Axis(0), 0.0);
                mean.iter()
                    .zip(std.iter())
                    .map(|(&mean, &std)| ColumnScaler::Standard { mean, std })
                    .collect()
            }
            NormalizationMethod::MinMax => X
                .axis_iter(Axis(1))
                .map(|col| {
                    let (min, max) = col
                        .iter()
                        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
                    ColumnScaler::MinMax { min, max }
                })
                .collect(),
            NormalizationMethod::None => vec![ColumnScaler::Identity; X.ncols()],
        };

        Ok(Self { method, scalers })
    }

    pub fn method(&self) -> NormalizationMethod {
        self.method
    }

    pub fn scalers(&self) -> &[ColumnScaler] {
        &self.scalers
    }

    pub fn transform(&self, X: &Array2<f64>) -> Result<Array2<f64>> {
        if X.ncols() != self.scalers.len() {
            return Err(PrepError::shape(format!(
                "normalizer fitted on {} columns, got {}",
                self.scalers.len(),
                X.ncols()
            )));
        }

        let mut normalized = X.clone();
        for (mut col, scaler) in normalized.axis_iter_mut(Axis(1)).zip(&self.scalers) {
            col.mapv_inplace(|v| scaler.apply(v));
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standard_scaling_centers_columns() {
        let X = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let normalizer = DataNormalizer::fit(&X, NormalizationMethod::Standard).unwrap();
        let Z = normalizer.transform(&X).unwrap();
        for col in Z.axis_iter(Axis(1)) {
            assert!(col.mean().unwrap().abs() < 1e-12);
            assert!((col.std(0.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_minmax_and_constant_column() {
        let X = array![[0.0, 5.0], [5.0, 5.0], [10.0, 5.0]];
        let normalizer = DataNormalizer::fit(&X, NormalizationMethod::MinMax).unwrap();
        let Z = normalizer.transform(&X).unwrap();
        assert_eq!(Z.column(0).to_vec(), vec![0.0, 0.5, 1.0]);
        assert_eq!(Z.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_transform_uses_training_parameters() {
        let train = array![[0.0], [10.0]];
        let normalizer = DataNormalizer::fit(&train, NormalizationMethod::MinMax).unwrap();
        let Z = normalizer.transform(&array![[20.0]]).unwrap();
        assert_eq!(Z[[0, 0]], 2.0);
    }

    #[test]
    fn test_errors() {
        assert!(DataNormalizer::fit(&Array2::zeros((0, 2)), NormalizationMethod::Standard).is_err());
        let normalizer = DataNormalizer::fit(&array![[1.0, 2.0]], NormalizationMethod::None).unwrap();
        assert!(normalizer.transform(&array![[1.0]]).is_err());
        assert!("robust".parse::<NormalizationMethod>().is_err());
        assert_eq!("MinMax".parse::<NormalizationMethod>().unwrap(), NormalizationMethod::MinMax);
    }
}
