use config::{Config as ConfigLoader, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::classifier::{ForestParams, MlpParams, ModelVariant, NaiveBayesParams, SvmParams, TrainingSettings};
use crate::error::{ExtractError, Result};
use crate::features::{FeatureSet, DEFAULT_FEATURES};
use crate::service::dataset::{DEFAULT_TRAIN_RATIO, OTHERS_SCALING_FACTOR};

/// 默认配置文件 (不存在时忽略)
pub const DEFAULT_CONFIG_FILE: &str = "field-extractor.toml";
/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "FIELD_EXTRACTOR_CONFIG";
/// 覆盖配置项的环境变量前缀，如 `FIELD_EXTRACTOR__MODEL__VARIANT=nb`
pub const ENV_PREFIX: &str = "FIELD_EXTRACTOR";

/// 应用配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub corpus: CorpusConfig,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// JSON 文件或包含 JSON 文件的目录
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/invoices"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// 启用的特征 (顺序即向量坐标顺序)
    pub features: Vec<String>,
    pub others_scaling_factor: f64,
    /// 仅作用于训练集
    pub balance_others: bool,
    pub train_ratio: f64,
    pub shuffle_seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            features: DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect(),
            others_scaling_factor: OTHERS_SCALING_FACTOR,
            balance_others: true,
            train_ratio: DEFAULT_TRAIN_RATIO,
            shuffle_seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    /// 模型 blob 目录
    pub store_dir: PathBuf,
    /// 已有持久化模型时直接加载，不重新训练
    pub reuse_persisted: bool,
    pub svm: SvmParams,
    pub mlp: MlpParams,
    pub naive_bayes: NaiveBayesParams,
    pub forest: ForestParams,
}

impl ModelConfig {
    pub fn training(&self) -> TrainingSettings {
        TrainingSettings {
            svm: self.svm.clone(),
            mlp: self.mlp.clone(),
            naive_bayes: self.naive_bayes,
            forest: self.forest,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::SupportVector,
            store_dir: PathBuf::from("models"),
            reuse_persisted: false,
            svm: SvmParams::default(),
            mlp: MlpParams::default(),
            naive_bayes: NaiveBayesParams::default(),
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub json_path: PathBuf,
    pub csv_path: Option<PathBuf>,
    /// 日志中列出的最差发票数
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            json_path: PathBuf::from("invoice_scores.json"),
            csv_path: None,
            top_n: 20,
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 < 配置文件 < 环境变量
    ///
    /// 未显式指定文件时依次尝试 `FIELD_EXTRACTOR_CONFIG` 与 `field-extractor.toml`，
    /// 文件不存在不视为错误；显式指定的文件必须存在。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(p) if !p.is_empty() => File::from(PathBuf::from(p)).required(true),
                _ => File::with_name(DEFAULT_CONFIG_FILE).required(false),
            },
        };

        let defaults = ConfigLoader::try_from(&AppConfig::default())
            .map_err(|e| ExtractError::InvalidConfig(format!("failed to encode defaults: {}", e)))?;

        let config: AppConfig = ConfigLoader::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ExtractError::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.dataset.train_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ExtractError::InvalidConfig(format!(
                "dataset.train_ratio must be within [0, 1], got {}",
                ratio
            )));
        }
        let factor = self.dataset.others_scaling_factor;
        if factor.is_nan() || factor < 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "dataset.others_scaling_factor must be non-negative, got {}",
                factor
            )));
        }
        if self.dataset.features.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "dataset.features must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.dataset.features.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(ExtractError::InvalidConfig(format!(
                "dataset.features lists '{}' more than once",
                dup
            )));
        }
        Ok(())
    }

    pub fn feature_set(&self) -> Result<FeatureSet> {
        FeatureSet::new(self.dataset.features.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dataset.others_scaling_factor, 0.3);
        assert_eq!(config.dataset.train_ratio, 0.8);
        assert_eq!(config.report.top_n, 20);
        assert_eq!(config.feature_set().unwrap().len(), DEFAULT_FEATURES.len());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[dataset]
features = ["rel_dist_top", "contains_date"]
train_ratio = 0.5

[model]
variant = "Naive Bayes"
store_dir = "/tmp/models"

[model.forest]
n_estimators = 7
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.dataset.features, vec!["rel_dist_top", "contains_date"]);
        assert_eq!(config.dataset.train_ratio, 0.5);
        assert!(config.dataset.balance_others);
        assert_eq!(config.model.variant, ModelVariant::NaiveBayes);
        assert_eq!(config.model.forest.n_estimators, 7);
        assert_eq!(config.model.training().forest.max_depth, 2);
        assert_eq!(config.report.json_path, PathBuf::from("invoice_scores.json"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = AppConfig::default();
        config.dataset.train_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dataset.others_scaling_factor = -0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dataset.features.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dataset.features = vec!["a".into(), "b".into(), "a".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }
}
