//! Ridge regression on centered data, used by round-robin imputation.

#![allow(non_snake_case)]

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl RidgeModel {
    /// Solve (XcᵀXc + αI) w = Xcᵀyc on centered data; bias = ȳ - x̄·w.
    /// Returns `None` for empty input or a singular system.
    pub fn fit(X: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Option<Self> {
        let n_samples = X.nrows();
        let n_features = X.ncols();
        if n_samples == 0 || n_samples != y.len() {
            return None;
        }

        let x_mean = X.mean_axis(Axis(0))?;
        let y_mean = y.mean()?;
        if n_features == 0 {
            return Some(Self {
                weights: Vec::new(),
                bias: y_mean,
            });
        }

        let Xc = X - &x_mean;
        let yc = y - y_mean;

        // XᵀX + αI
        let mut xtx = Xc.t().dot(&Xc);
        for i in 0..n_features {
            xtx[[i, i]] += alpha;
        }
        // Xᵀy
        let xty = Xc.t().dot(&yc);

        let weights = solve_linear_system(&xtx, &xty)?;
        let bias = y_mean - x_mean.dot(&weights);

        Some(Self {
            weights: weights.to_vec(),
            bias,
        })
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(row.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(A: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = A.nrows();
    let mut augmented = Array2::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            augmented[[i, j]] = A[[i, j]];
        }
        augmented[[i, n]] = b[i];
    }

    // Forward elimination
    for i in 0..n {
        let mut max_row = i;
        let mut max_val = augmented[[i, i]].abs();
        for k in (i + 1)..n {
            if augmented[[k, i]].abs() > max_val {
                max_val = augmented[[k, i]].abs();
                max_row = k;
            }
        }

        if max_row != i {
            for j in 0..=n {
                augmented.swap([i, j], [max_row, j]);
            }
        }

        let pivot = augmented[[i, i]];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for k in (i + 1)..n {
            let factor = augmented[[k, i]] / pivot;
            for j in i..=n {
                augmented[[k, j]] -= factor * augmented[[i, j]];
            }
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = augmented[[i, n]];
        for j in (i + 1)..n {
            sum -= augmented[[i, j]] * x[j];
        }
        x[i] = sum / augmented[[i, i]];
    }

    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_linear_relation() {
        let X = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y: Array1<f64> = X.rows().into_iter().map(|r| 2.0 * r[0] - 3.0 * r[1] + 1.0).collect();
        let model = RidgeModel::fit(&X, &y, 1e-9).unwrap();
        assert!((model.weights[0] - 2.0).abs() < 1e-6);
        assert!((model.weights[1] + 3.0).abs() < 1e-6);
        assert!((model.bias - 1.0).abs() < 1e-6);
        assert!((model.predict_row(array![10.0, 1.0].view()) - 18.0).abs() < 1e-5);
    }

    #[test]
    fn test_constant_predictor_regularized() {
        let X = array![[1.0], [1.0], [1.0]];
        let y = array![2.0, 4.0, 6.0];
        let model = RidgeModel::fit(&X, &y, 1.0).unwrap();
        assert_eq!(model.weights, vec![0.0]);
        assert!((model.bias - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let X = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        assert!(RidgeModel::fit(&X, &y, 1.0).is_none());
    }
}
