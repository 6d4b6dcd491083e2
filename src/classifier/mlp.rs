use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{masked_softmax, present_classes, Classifier};
use crate::error::{ExtractError, Result};
use crate::models::Category;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;
/// 连续多少轮损失下降不足 tol 时提前停止
const NO_CHANGE_ROUNDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpParams {
    pub hidden_layers: Vec<usize>,
    /// L2 正则系数
    pub alpha: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![30, 30],
            alpha: 1e-5,
            learning_rate: 1e-3,
            max_iter: 500,
            tol: 1e-4,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layer {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

struct AdamMoments {
    weights_m: Array2<f64>,
    weights_v: Array2<f64>,
    biases_m: Array1<f64>,
    biases_v: Array1<f64>,
}

impl AdamMoments {
    fn for_layer(layer: &Layer) -> Self {
        Self {
            weights_m: Array2::zeros(layer.weights.raw_dim()),
            weights_v: Array2::zeros(layer.weights.raw_dim()),
            biases_m: Array1::zeros(layer.biases.raw_dim()),
            biases_v: Array1::zeros(layer.biases.raw_dim()),
        }
    }
}

/// 多层感知机 (ReLU 隐藏层 + softmax 输出, Adam 全批量训练)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLayerPerceptron {
    params: MlpParams,
    layers: Vec<Layer>,
    present: Vec<bool>,
}

impl MultiLayerPerceptron {
    pub fn new(params: MlpParams) -> Self {
        Self {
            params,
            layers: Vec::new(),
            present: vec![false; Category::COUNT],
        }
    }

    fn init_layers(&mut self, n_inputs: usize, rng: &mut StdRng) {
        let mut sizes = vec![n_inputs];
        sizes.extend(self.params.hidden_layers.iter().copied());
        sizes.push(Category::COUNT);

        self.layers = sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                // Glorot 均匀初始化
                let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
                Layer {
                    weights: Array2::from_shape_fn((fan_in, fan_out), |_| {
                        rng.gen_range(-bound..bound)
                    }),
                    biases: Array1::from_shape_fn(fan_out, |_| rng.gen_range(-bound..bound)),
                }
            })
            .collect();
    }

    /// 返回每层激活值 (含输入) 与输出概率
    fn forward(&self, x: ArrayView2<'_, f64>) -> (Vec<Array2<f64>>, Array2<f64>) {
        let mut activations = vec![x.to_owned()];
        let mut proba = Array2::zeros((x.nrows(), Category::COUNT));
        let Some((output, hidden)) = self.layers.split_last() else {
            return (activations, proba);
        };

        for layer in hidden {
            let z = activations[activations.len() - 1].dot(&layer.weights) + &layer.biases;
            activations.push(z.mapv(|v| v.max(0.0)));
        }
        let logits = activations[activations.len() - 1].dot(&output.weights) + &output.biases;

        for (i, row) in logits.rows().into_iter().enumerate() {
            for (j, p) in masked_softmax(&row.to_vec(), &self.present).into_iter().enumerate() {
                proba[[i, j]] = p;
            }
        }
        (activations, proba)
    }

    fn loss(&self, proba: &Array2<f64>, targets: &Array2<f64>, n: f64) -> f64 {
        let cross_entropy = -targets
            .iter()
            .zip(proba.iter())
            .filter(|&(&t, _)| t > 0.0)
            .map(|(&t, &p)| t * p.max(1e-12).ln())
            .sum::<f64>()
            / n;
        let penalty: f64 = self
            .layers
            .iter()
            .map(|l| l.weights.iter().map(|w| w * w).sum::<f64>())
            .sum();
        cross_entropy + self.params.alpha * penalty / (2.0 * n)
    }
}

impl Classifier for MultiLayerPerceptron {
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[usize]) -> Result<()> {
        let n_samples = features.nrows();
        if n_samples == 0 {
            return Err(ExtractError::InvalidInput("no samples to fit".to_string()));
        }
        let n = n_samples as f64;

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        self.present = present_classes(labels);
        self.init_layers(features.ncols(), &mut rng);

        let mut targets = Array2::zeros((n_samples, Category::COUNT));
        for (i, &label) in labels.iter().enumerate() {
            targets[[i, label]] = 1.0;
        }

        let mut moments: Vec<AdamMoments> = self.layers.iter().map(AdamMoments::for_layer).collect();
        let mut best_loss = f64::INFINITY;
        let mut stalled = 0;

        for iteration in 1..=self.params.max_iter {
            let (activations, proba) = self.forward(features);

            let loss = self.loss(&proba, &targets, n);
            if loss > best_loss - self.params.tol {
                stalled += 1;
            } else {
                stalled = 0;
            }
            best_loss = best_loss.min(loss);
            if stalled >= NO_CHANGE_ROUNDS {
                tracing::debug!(iteration, loss, "mlp converged");
                break;
            }

            // 反向传播
            let mut delta = (&proba - &targets) / n;
            let mut gradients = Vec::with_capacity(self.layers.len());
            for idx in (0..self.layers.len()).rev() {
                let input = &activations[idx];
                let grad_w = input.t().dot(&delta) + &self.layers[idx].weights * (self.params.alpha / n);
                let grad_b = delta.sum_axis(Axis(0));
                if idx > 0 {
                    let mut next = delta.dot(&self.layers[idx].weights.t());
                    next.zip_mut_with(input, |d, &a| {
                        if a <= 0.0 {
                            *d = 0.0;
                        }
                    });
                    delta = next;
                }
                gradients.push((idx, grad_w, grad_b));
            }

            let t = iteration as i32;
            let correction1 = 1.0 - BETA1.powi(t);
            let correction2 = 1.0 - BETA2.powi(t);
            let step = self.params.learning_rate * correction2.sqrt() / correction1;
            for (idx, grad_w, grad_b) in gradients {
                let moment = &mut moments[idx];
                let layer = &mut self.layers[idx];

                moment.weights_m.zip_mut_with(&grad_w, |m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
                moment.weights_v.zip_mut_with(&grad_w, |v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);
                moment.biases_m.zip_mut_with(&grad_b, |m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
                moment.biases_v.zip_mut_with(&grad_b, |v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);

                Zip::from(&mut layer.weights)
                    .and(&moment.weights_m)
                    .and(&moment.weights_v)
                    .for_each(|w, &m, &v| *w -= step * m / (v.sqrt() + ADAM_EPSILON));
                Zip::from(&mut layer.biases)
                    .and(&moment.biases_m)
                    .and(&moment.biases_v)
                    .for_each(|b, &m, &v| *b -= step * m / (v.sqrt() + ADAM_EPSILON));
            }
        }
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        self.forward(features).1
    }
}
