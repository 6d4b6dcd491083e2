use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{masked_softmax, present_classes, Classifier, Predictions};
use crate::error::{ExtractError, Result};
use crate::models::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    Linear,
    Rbf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    pub kernels: Vec<KernelKind>,
    /// RBF 核宽度候选
    pub gammas: Vec<f64>,
    /// 正则化系数 C 候选
    pub costs: Vec<f64>,
    /// 网格搜索交叉验证折数
    pub folds: usize,
    pub epochs: usize,
    /// RBF 随机傅里叶特征维度
    pub fourier_components: usize,
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kernels: vec![KernelKind::Linear, KernelKind::Rbf],
            gammas: vec![0.001, 0.0001],
            costs: vec![1.0, 100.0],
            folds: 5,
            epochs: 20,
            fourier_components: 100,
            seed: 0,
        }
    }
}

/// 网格搜索的一组超参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvmCandidate {
    pub kernel: KernelKind,
    pub gamma: Option<f64>,
    pub cost: f64,
}

impl SvmParams {
    fn candidates(&self) -> Vec<SvmCandidate> {
        let mut out = Vec::new();
        for &kernel in &self.kernels {
            for &cost in &self.costs {
                match kernel {
                    KernelKind::Linear => out.push(SvmCandidate {
                        kernel,
                        gamma: None,
                        cost,
                    }),
                    KernelKind::Rbf => out.extend(self.gammas.iter().map(|&gamma| SvmCandidate {
                        kernel,
                        gamma: Some(gamma),
                        cost,
                    })),
                }
            }
        }
        out
    }
}

/// 输入空间映射: 线性核直接使用原特征，RBF 核使用随机傅里叶特征近似
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Embedding {
    Identity,
    Fourier {
        weights: Array2<f64>,
        offsets: Array1<f64>,
    },
}

impl Embedding {
    fn for_candidate(candidate: &SvmCandidate, n_inputs: usize, params: &SvmParams) -> Self {
        let Some(gamma) = candidate.gamma else {
            return Embedding::Identity;
        };
        let mut rng = StdRng::seed_from_u64(params.seed);
        let components = params.fourier_components.max(1);
        let scale = (2.0 * gamma).sqrt();
        let weights = Array2::from_shape_fn((n_inputs, components), |_| scale * standard_normal(&mut rng));
        let offsets = Array1::from_shape_fn(components, |_| {
            rng.gen_range(0.0..2.0 * std::f64::consts::PI)
        });
        Embedding::Fourier { weights, offsets }
    }

    /// 映射后追加常数列作为偏置
    fn apply(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mapped = match self {
            Embedding::Identity => x.to_owned(),
            Embedding::Fourier { weights, offsets } => {
                let norm = (2.0 / offsets.len() as f64).sqrt();
                (x.dot(weights) + offsets).mapv(|v| norm * v.cos())
            }
        };
        let mut augmented = Array2::ones((mapped.nrows(), mapped.ncols() + 1));
        augmented.slice_mut(s![.., ..mapped.ncols()]).assign(&mapped);
        augmented
    }
}

fn standard_normal(rng: &mut StdRng) -> f64 {
    // Box-Muller
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// 一对其余线性分类器组
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OneVsRest {
    /// 每个类别一行权重 (未出现的类别全 0)
    weights: Array2<f64>,
    present: Vec<bool>,
}

impl OneVsRest {
    /// Pegasos 次梯度训练
    fn train(x: &Array2<f64>, labels: &[usize], cost: f64, epochs: usize, seed: u64) -> Self {
        let n = x.nrows();
        let present = present_classes(labels);
        let lambda = 1.0 / (cost * n as f64);
        let radius = 1.0 / lambda.sqrt();
        let mut weights = Array2::zeros((Category::COUNT, x.ncols()));
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n).collect();

        for (class, _) in present.iter().enumerate().filter(|&(_, &p)| p) {
            let mut w = Array1::<f64>::zeros(x.ncols());
            let mut t = 0usize;
            for _ in 0..epochs.max(1) {
                order.shuffle(&mut rng);
                for &i in &order {
                    t += 1;
                    let eta = 1.0 / (lambda * t as f64);
                    let y = if labels[i] == class { 1.0 } else { -1.0 };
                    let row = x.row(i);
                    let margin = y * w.dot(&row);
                    w *= 1.0 - eta * lambda;
                    if margin < 1.0 {
                        w.scaled_add(eta * y, &row);
                    }
                    let norm = w.dot(&w).sqrt();
                    if norm > radius {
                        w *= radius / norm;
                    }
                }
            }
            weights.row_mut(class).assign(&w);
        }

        Self { weights, present }
    }

    fn scores(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weights.t())
    }

    fn proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let scores = self.scores(x);
        let mut out = Array2::zeros(scores.raw_dim());
        for (i, row) in scores.rows().into_iter().enumerate() {
            for (j, p) in masked_softmax(&row.to_vec(), &self.present).into_iter().enumerate() {
                out[[i, j]] = p;
            }
        }
        out
    }
}

/// 支持向量机 (一对其余, 内部网格搜索)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportVectorMachine {
    params: SvmParams,
    chosen: Option<SvmCandidate>,
    embedding: Embedding,
    ovr: Option<OneVsRest>,
}

impl SupportVectorMachine {
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            chosen: None,
            embedding: Embedding::Identity,
            ovr: None,
        }
    }

    /// 网格搜索选中的超参数
    pub fn chosen(&self) -> Option<&SvmCandidate> {
        self.chosen.as_ref()
    }

    fn fit_candidate(
        &self,
        candidate: &SvmCandidate,
        x: ArrayView2<'_, f64>,
        labels: &[usize],
    ) -> (Embedding, OneVsRest) {
        let embedding = Embedding::for_candidate(candidate, x.ncols(), &self.params);
        let mapped = embedding.apply(x);
        let ovr = OneVsRest::train(&mapped, labels, candidate.cost, self.params.epochs, self.params.seed);
        (embedding, ovr)
    }

    /// k 折交叉验证平均准确率
    fn cross_validate(&self, candidate: &SvmCandidate, x: ArrayView2<'_, f64>, labels: &[usize], folds: usize) -> f64 {
        let n = x.nrows();
        let mut total = 0.0;
        for fold in 0..folds {
            let (test_idx, train_idx): (Vec<usize>, Vec<usize>) = (0..n).partition(|i| i % folds == fold);
            if test_idx.is_empty() || train_idx.is_empty() {
                continue;
            }
            let train_x = x.select(Axis(0), &train_idx);
            let train_labels: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();
            let (embedding, ovr) = self.fit_candidate(candidate, train_x.view(), &train_labels);

            let test_x = embedding.apply(x.select(Axis(0), &test_idx).view());
            let predicted = Predictions::from_probabilities(&ovr.proba(&test_x));
            let correct = predicted
                .categories
                .iter()
                .zip(&test_idx)
                .filter(|&(c, &i)| c.index() == labels[i])
                .count();
            total += correct as f64 / test_idx.len() as f64;
        }
        total / folds as f64
    }
}

impl Classifier for SupportVectorMachine {
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[usize]) -> Result<()> {
        let candidates = self.params.candidates();
        let Some(first) = candidates.first().copied() else {
            return Err(ExtractError::InvalidConfig(
                "svm grid search has no candidates".to_string(),
            ));
        };
        let n = features.nrows();
        if n == 0 {
            return Err(ExtractError::InvalidInput("no samples to fit".to_string()));
        }

        let folds = self.params.folds.min(n);
        let mut best = first;
        if folds >= 2 && candidates.len() > 1 {
            let mut best_score = f64::NEG_INFINITY;
            for candidate in &candidates {
                let score = self.cross_validate(candidate, features, labels, folds);
                tracing::debug!(?candidate, score, "svm grid search");
                if score > best_score {
                    best_score = score;
                    best = *candidate;
                }
            }
            tracing::info!(?best, best_score, "svm grid search finished");
        }

        let (embedding, ovr) = self.fit_candidate(&best, features, labels);
        self.chosen = Some(best);
        self.embedding = embedding;
        self.ovr = Some(ovr);
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        match &self.ovr {
            Some(ovr) => ovr.proba(&self.embedding.apply(features)),
            None => Array2::zeros((features.nrows(), Category::COUNT)),
        }
    }
}
