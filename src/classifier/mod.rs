//! 可替换的 token 分类模型
//!
//! [`Classifier`] 是各算法实现的统一 fit/predict 接口；[`Model`] 在其外层
//! 负责行归一化、特征顺序校验和持久化格式。

pub mod forest;
pub mod mlp;
pub mod naive_bayes;
pub mod svm;

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ExtractError, Result};
use crate::models::{Category, Dataset};

pub use forest::{ForestParams, RandomForest};
pub use mlp::{MlpParams, MultiLayerPerceptron};
pub use naive_bayes::{GaussianNaiveBayes, NaiveBayesParams};
pub use svm::{KernelKind, SupportVectorMachine, SvmParams};

/// 算法种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    #[serde(rename = "Support Vector Machine", alias = "svm")]
    SupportVector,
    #[serde(rename = "Neural Network", alias = "nn")]
    NeuralNetwork,
    #[serde(rename = "Naive Bayes", alias = "nb")]
    NaiveBayes,
    #[serde(rename = "Random Forest", alias = "rf")]
    RandomForest,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::SupportVector,
        ModelVariant::NeuralNetwork,
        ModelVariant::NaiveBayes,
        ModelVariant::RandomForest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelVariant::SupportVector => "Support Vector Machine",
            ModelVariant::NeuralNetwork => "Neural Network",
            ModelVariant::NaiveBayes => "Naive Bayes",
            ModelVariant::RandomForest => "Random Forest",
        }
    }

    /// 持久化 blob 名称
    pub fn blob_name(self) -> &'static str {
        match self {
            ModelVariant::SupportVector => "svm_model",
            ModelVariant::NeuralNetwork => "nn_model",
            ModelVariant::NaiveBayes => "nb_model",
            ModelVariant::RandomForest => "rf_model",
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            ModelVariant::SupportVector => "svm",
            ModelVariant::NeuralNetwork => "nn",
            ModelVariant::NaiveBayes => "nb",
            ModelVariant::RandomForest => "rf",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelVariant {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(s) || v.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExtractError::InvalidConfig(format!("unknown model variant '{}'", s)))
    }
}

/// 各算法实现的统一接口
///
/// 输入为已归一化的特征矩阵与类别下标；`predict_proba` 返回
/// `n × Category::COUNT` 的概率矩阵，训练中未出现的类别概率为 0。
pub trait Classifier: Send + Sync {
    fn fit(&mut self, features: ArrayView2<'_, f64>, labels: &[usize]) -> Result<()>;

    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64>;
}

/// 各算法超参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub svm: SvmParams,
    pub mlp: MlpParams,
    pub naive_bayes: NaiveBayesParams,
    pub forest: ForestParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "state")]
enum Backend {
    SupportVector(SupportVectorMachine),
    NeuralNetwork(MultiLayerPerceptron),
    NaiveBayes(GaussianNaiveBayes),
    RandomForest(RandomForest),
}

impl Backend {
    fn new(variant: ModelVariant, settings: &TrainingSettings) -> Self {
        match variant {
            ModelVariant::SupportVector => {
                Backend::SupportVector(SupportVectorMachine::new(settings.svm.clone()))
            }
            ModelVariant::NeuralNetwork => {
                Backend::NeuralNetwork(MultiLayerPerceptron::new(settings.mlp.clone()))
            }
            ModelVariant::NaiveBayes => {
                Backend::NaiveBayes(GaussianNaiveBayes::new(settings.naive_bayes))
            }
            ModelVariant::RandomForest => {
                Backend::RandomForest(RandomForest::new(settings.forest))
            }
        }
    }

    fn classifier(&self) -> &dyn Classifier {
        match self {
            Backend::SupportVector(m) => m,
            Backend::NeuralNetwork(m) => m,
            Backend::NaiveBayes(m) => m,
            Backend::RandomForest(m) => m,
        }
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Backend::SupportVector(m) => m,
            Backend::NeuralNetwork(m) => m,
            Backend::NaiveBayes(m) => m,
            Backend::RandomForest(m) => m,
        }
    }

    fn variant(&self) -> ModelVariant {
        match self {
            Backend::SupportVector(_) => ModelVariant::SupportVector,
            Backend::NeuralNetwork(_) => ModelVariant::NeuralNetwork,
            Backend::NaiveBayes(_) => ModelVariant::NaiveBayes,
            Backend::RandomForest(_) => ModelVariant::RandomForest,
        }
    }
}

/// 批量预测结果 (类别与其置信度按行对齐)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predictions {
    pub categories: Vec<Category>,
    pub confidences: Vec<f64>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// 取每行最大概率 (并列时取下标最小者)
    pub fn from_probabilities(proba: &Array2<f64>) -> Self {
        let mut categories = Vec::with_capacity(proba.nrows());
        let mut confidences = Vec::with_capacity(proba.nrows());
        for row in proba.rows() {
            let mut best_idx = 0;
            let mut best = f64::NEG_INFINITY;
            for (idx, &p) in row.iter().enumerate() {
                if p > best {
                    best = p;
                    best_idx = idx;
                }
            }
            categories.push(Category::from_index(best_idx).unwrap_or(Category::Others));
            confidences.push(if best.is_finite() { best } else { 0.0 });
        }
        Self {
            categories,
            confidences,
        }
    }
}

/// 已训练模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    variant: ModelVariant,
    feature_names: Vec<String>,
    trained_at: DateTime<Utc>,
    samples: usize,
    backend: Backend,
}

impl Model {
    /// 用样本集训练指定算法
    pub fn train(variant: ModelVariant, dataset: &Dataset, settings: &TrainingSettings) -> Result<Self> {
        Self::fit(
            variant,
            dataset.feature_names.clone(),
            &dataset.features,
            &dataset.categories,
            settings,
        )
    }

    pub fn fit(
        variant: ModelVariant,
        feature_names: Vec<String>,
        features: &[Vec<f64>],
        labels: &[Category],
        settings: &TrainingSettings,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(ExtractError::InvalidInput(
                "cannot train on an empty dataset".to_string(),
            ));
        }
        if features.len() != labels.len() {
            return Err(ExtractError::InvalidInput(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }

        let matrix = to_normalized_matrix(features, feature_names.len())?;
        let labels: Vec<usize> = labels.iter().map(|c| c.index()).collect();

        let mut backend = Backend::new(variant, settings);
        backend.classifier_mut().fit(matrix.view(), &labels)?;

        Ok(Self {
            variant,
            feature_names,
            trained_at: Utc::now(),
            samples: features.len(),
            backend,
        })
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// 推理所用特征必须与训练时同名同序
    pub fn ensure_features(&self, names: &[String]) -> Result<()> {
        if names == self.feature_names.as_slice() {
            return Ok(());
        }
        if names.len() != self.feature_names.len() {
            return Err(ExtractError::FeatureMismatch(format!(
                "model '{}' was trained on {} features, got {}",
                self.variant,
                self.feature_names.len(),
                names.len()
            )));
        }
        let position = names
            .iter()
            .zip(&self.feature_names)
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        Err(ExtractError::FeatureMismatch(format!(
            "model '{}' expects feature '{}' at position {}, got '{}'",
            self.variant, self.feature_names[position], position, names[position]
        )))
    }

    pub fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Array2<f64>> {
        let matrix = to_normalized_matrix(features, self.feature_names.len())?;
        Ok(self.backend.classifier().predict_proba(matrix.view()))
    }

    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Predictions> {
        let proba = self.predict_proba(features)?;
        Ok(Predictions::from_probabilities(&proba))
    }

    pub fn predict_categories(&self, features: &[Vec<f64>]) -> Result<Vec<Category>> {
        Ok(self.predict(features)?.categories)
    }

    /// 每行预测类别对应的置信度
    pub fn predict_confidences(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(self.predict(features)?.confidences)
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ExtractError::persistence(self.variant.blob_name(), e))
    }

    pub fn from_blob(name: &str, blob: &[u8]) -> Result<Self> {
        let model: Model =
            serde_json::from_slice(blob).map_err(|e| ExtractError::persistence(name, e))?;
        if model.backend.variant() != model.variant {
            return Err(ExtractError::persistence(
                name,
                format!(
                    "blob declares '{}' but holds '{}' state",
                    model.variant,
                    model.backend.variant()
                ),
            ));
        }
        Ok(model)
    }
}

/// 行向量 L2 归一化 (全零行保持不变)
pub fn normalize_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
}

fn to_normalized_matrix(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>> {
    let mut flat = Vec::with_capacity(rows.len() * width);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != width {
            return Err(ExtractError::FeatureMismatch(format!(
                "row {} has {} features, model expects {}",
                i,
                row.len(),
                width
            )));
        }
        flat.extend_from_slice(row);
    }
    let mut matrix = Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| ExtractError::FeatureMismatch(e.to_string()))?;
    normalize_rows(&mut matrix);
    Ok(matrix)
}

/// 行内 softmax，仅在 `present` 标记的类别上归一化，其余为 0
pub(crate) fn masked_softmax(scores: &[f64], present: &[bool]) -> Vec<f64> {
    let max = scores
        .iter()
        .zip(present)
        .filter_map(|(&s, &p)| if p { Some(s) } else { None })
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; scores.len()];
    }
    let mut out: Vec<f64> = scores
        .iter()
        .zip(present)
        .map(|(&s, &p)| if p { (s - max).exp() } else { 0.0 })
        .collect();
    let sum: f64 = out.iter().sum();
    if sum > 0.0 {
        out.iter_mut().for_each(|v| *v /= sum);
    }
    out
}

/// 训练标签中出现过的类别
pub(crate) fn present_classes(labels: &[usize]) -> Vec<bool> {
    let mut present = vec![false; Category::COUNT];
    for &label in labels {
        if let Some(slot) = present.get_mut(label) {
            *slot = true;
        }
    }
    present
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rows_are_unit_normalized() {
        let mut m = array![[3.0, 4.0], [0.0, 0.0], [1.0, 0.0]];
        normalize_rows(&mut m);
        assert!((m[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((m[[0, 1]] - 0.8).abs() < 1e-12);
        assert_eq!(m.row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(m.row(2).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        let mut proba = Array2::zeros((1, Category::COUNT));
        proba[[0, Category::Tax.index()]] = 0.4;
        proba[[0, Category::TotalAmount.index()]] = 0.4;
        let predictions = Predictions::from_probabilities(&proba);
        assert_eq!(predictions.categories, vec![Category::Tax]);
        assert_eq!(predictions.confidences, vec![0.4]);
    }

    #[test]
    fn masked_softmax_zeroes_absent_classes() {
        let p = masked_softmax(&[1.0, 5.0, 1.0], &[true, false, true]);
        assert_eq!(p[1], 0.0);
        assert!((p[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn variant_names_parse() {
        assert_eq!("svm".parse::<ModelVariant>().unwrap(), ModelVariant::SupportVector);
        assert_eq!(
            "Random Forest".parse::<ModelVariant>().unwrap(),
            ModelVariant::RandomForest
        );
        assert!("xgboost".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn row_width_mismatch_is_rejected() {
        let features = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = vec![Category::Others, Category::Tax];
        let model = Model::fit(
            ModelVariant::NaiveBayes,
            vec!["a".into(), "b".into()],
            &features,
            &labels,
            &TrainingSettings::default(),
        )
        .unwrap();
        let err = model.predict(&[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(err, ExtractError::FeatureMismatch(_)));
    }

    #[test]
    fn feature_order_is_enforced() {
        let features = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = vec![Category::Others, Category::Tax];
        let model = Model::fit(
            ModelVariant::NaiveBayes,
            vec!["a".into(), "b".into()],
            &features,
            &labels,
            &TrainingSettings::default(),
        )
        .unwrap();
        assert!(model.ensure_features(&["a".to_string(), "b".to_string()]).is_ok());
        assert!(model.ensure_features(&["b".to_string(), "a".to_string()]).is_err());
        assert!(model.ensure_features(&["a".to_string()]).is_err());
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let err = Model::fit(
            ModelVariant::NaiveBayes,
            vec!["a".into()],
            &[],
            &[],
            &TrainingSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidInput(_)));
    }
}
