use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{masked_softmax, Classifier};
use crate::error::{ExtractError, Result};
use crate::models::Category;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaiveBayesParams {
    /// 方差平滑系数 (乘以最大特征方差)
    pub var_smoothing: f64,
}

impl Default for NaiveBayesParams {
    fn default() -> Self {
        Self { var_smoothing: 1e-9 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassStats {
    class: usize,
    log_prior: f64,
    mean: Vec<f64>,
    var: Vec<f64>,
}

impl ClassStats {
    fn log_likelihood(&self, row: &[f64]) -> f64 {
        let mut ll = self.log_prior;
        for ((&x, &mu), &var) in row.iter().zip(&self.mean).zip(&self.var) {
            ll -= 0.5 * ((2.0 * std::f64::consts::PI * var).ln() + (x - mu).powi(2) / var);
        }
        ll
    }
}

/// 高斯朴素贝叶斯
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    params: NaiveBayesParams,
    classes: Vec<ClassStats>,
}

impl GaussianNaiveBayes {
    pub fn new(params: NaiveBayesParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
        }
    }
}

impl Classifier for GaussianNaiveBayes {
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[usize]) -> Result<()> {
        let n = features.nrows();
        if n == 0 {
            return Err(ExtractError::InvalidInput("no samples to fit".to_string()));
        }

        let max_var = features
            .var_axis(Axis(0), 0.0)
            .iter()
            .copied()
            .fold(0.0_f64, f64::max);
        let epsilon = if max_var > 0.0 {
            self.params.var_smoothing * max_var
        } else {
            self.params.var_smoothing.max(f64::MIN_POSITIVE)
        };

        self.classes.clear();
        for class in 0..Category::COUNT {
            let rows: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == class)
                .map(|(i, _)| i)
                .collect();
            if rows.is_empty() {
                continue;
            }
            let subset = features.select(Axis(0), &rows);
            let mean = subset
                .mean_axis(Axis(0))
                .map(|m| m.to_vec())
                .unwrap_or_else(|| vec![0.0; features.ncols()]);
            let var = subset
                .var_axis(Axis(0), 0.0)
                .iter()
                .map(|v| v + epsilon)
                .collect();
            self.classes.push(ClassStats {
                class,
                log_prior: (rows.len() as f64 / n as f64).ln(),
                mean,
                var,
            });
        }
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros((features.nrows(), Category::COUNT));
        let mut present = vec![false; Category::COUNT];
        for stats in &self.classes {
            present[stats.class] = true;
        }

        for (i, row) in features.rows().into_iter().enumerate() {
            let row = row.to_vec();
            let mut scores = vec![f64::NEG_INFINITY; Category::COUNT];
            for stats in &self.classes {
                scores[stats.class] = stats.log_likelihood(&row);
            }
            for (j, p) in masked_softmax(&scores, &present).into_iter().enumerate() {
                out[[i, j]] = p;
            }
        }
        out
    }
}
