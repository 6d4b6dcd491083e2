use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Classifier;
use crate::error::{ExtractError, Result};
use crate::models::Category;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 2,
            min_samples_split: 2,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn leaf_for(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn class_counts(labels: &[usize], samples: &[usize]) -> Vec<usize> {
    let mut counts = vec![0usize; Category::COUNT];
    for &i in samples {
        counts[labels[i]] += 1;
    }
    counts
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// 随机森林 (bootstrap + Gini 决策树)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<Node>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
        }
    }

    fn build(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &[usize],
        samples: Vec<usize>,
        depth: usize,
        rng: &mut StdRng,
    ) -> Node {
        let counts = class_counts(labels, &samples);
        let distribution: Vec<f64> = counts
            .iter()
            .map(|&c| c as f64 / samples.len().max(1) as f64)
            .collect();
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;

        if depth >= self.params.max_depth || samples.len() < self.params.min_samples_split || pure {
            return Node::Leaf { distribution };
        }

        let Some(best) = self.best_split(x, labels, &samples, rng) else {
            return Node::Leaf { distribution };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| x[[i, best.feature]] <= best.threshold);

        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.build(x, labels, left, depth + 1, rng)),
            right: Box::new(self.build(x, labels, right, depth + 1, rng)),
        }
    }

    fn best_split(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &[usize],
        samples: &[usize],
        rng: &mut StdRng,
    ) -> Option<SplitCandidate> {
        let n_features = x.ncols();
        let max_features = ((n_features as f64).sqrt() as usize).max(1).min(n_features);
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(rng);
        features.truncate(max_features);

        let total = samples.len();
        let mut best: Option<SplitCandidate> = None;

        for feature in features {
            let mut column: Vec<(f64, usize)> =
                samples.iter().map(|&i| (x[[i, feature]], labels[i])).collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; Category::COUNT];
            let mut right = class_counts(labels, samples);
            for pos in 1..total {
                let (prev_value, prev_label) = column[pos - 1];
                left[prev_label] += 1;
                right[prev_label] -= 1;
                let value = column[pos].0;
                if prev_value >= value {
                    continue;
                }
                let impurity = (pos as f64 * gini(&left, pos)
                    + (total - pos) as f64 * gini(&right, total - pos))
                    / total as f64;
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (prev_value + value) / 2.0,
                        impurity,
                    });
                }
            }
        }
        best
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[usize]) -> Result<()> {
        let n = features.nrows();
        if n == 0 || self.params.n_estimators == 0 {
            return Err(ExtractError::InvalidInput(
                "random forest needs samples and at least one estimator".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(self.build(features, labels, bootstrap, 0, &mut rng));
        }
        self.trees = trees;
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros((features.nrows(), Category::COUNT));
        if self.trees.is_empty() {
            return out;
        }
        let weight = 1.0 / self.trees.len() as f64;
        for (i, row) in features.rows().into_iter().enumerate() {
            for tree in &self.trees {
                for (j, p) in tree.leaf_for(row).iter().enumerate() {
                    out[[i, j]] += p * weight;
                }
            }
        }
        out
    }
}
