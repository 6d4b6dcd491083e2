use std::collections::HashMap;

use crate::classifier::{Model, ModelVariant, Predictions, TrainingSettings};
use crate::error::{ExtractError, Result};
use crate::models::Dataset;
use crate::store::BlobStore;

/// 模型注册表: 每种算法至多一个在内存中的模型
///
/// 生命周期: 创建时为空，通过 `train` 或 `load` 显式填充，`predict` 只查内存，不做隐式 I/O。
pub struct ModelRegistry<S> {
    store: S,
    settings: TrainingSettings,
    models: HashMap<ModelVariant, Model>,
}

impl<S: BlobStore> ModelRegistry<S> {
    pub fn new(store: S) -> Self {
        Self::with_settings(store, TrainingSettings::default())
    }

    pub fn with_settings(store: S, settings: TrainingSettings) -> Self {
        Self {
            store,
            settings,
            models: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_ready(&self, variant: ModelVariant) -> bool {
        self.models.contains_key(&variant)
    }

    /// 从存储加载已持久化的模型
    ///
    /// blob 不存在时返回 `ModelNotReady`，读取或解析失败时返回 `Persistence`。
    pub fn load(&mut self, variant: ModelVariant) -> Result<&Model> {
        let name = variant.blob_name();
        let Some(blob) = self.store.load(name)? else {
            return Err(self.not_ready(variant));
        };
        let model = Model::from_blob(name, &blob)?;
        if model.variant() != variant {
            return Err(ExtractError::persistence(
                name,
                format!("blob holds a '{}' model, expected '{}'", model.variant(), variant),
            ));
        }
        tracing::info!(
            "Loaded model {} from {} (trained {}, {} samples)",
            variant,
            self.store.locate(name),
            model.trained_at(),
            model.samples()
        );
        self.models.insert(variant, model);
        self.model(variant)
    }

    /// 训练并持久化
    ///
    /// 训练成功后模型立即可用；持久化失败以 `Persistence` 返回，但内存中的模型保留。
    pub fn train(&mut self, variant: ModelVariant, dataset: &Dataset) -> Result<&Model> {
        if dataset.is_empty() {
            return Err(ExtractError::Training {
                variant,
                message: "training dataset is empty".to_string(),
            });
        }

        tracing::info!(
            "Training {} with {} samples of dimension {}",
            variant,
            dataset.len(),
            dataset.feature_names.len()
        );
        let model = Model::train(variant, dataset, &self.settings).map_err(|e| match e {
            ExtractError::InvalidInput(message) | ExtractError::InvalidConfig(message) => {
                ExtractError::Training { variant, message }
            }
            other => other,
        })?;
        let blob = model.to_blob();
        self.models.insert(variant, model);

        let name = variant.blob_name();
        if let Err(e) = blob.and_then(|bytes| self.store.store(name, &bytes)) {
            tracing::error!("Model {} trained but could not be persisted: {}", variant, e);
            return Err(e);
        }
        tracing::info!("Persisted model {} to {}", variant, self.store.locate(name));

        self.model(variant)
    }

    /// 只查询内存中的模型
    pub fn model(&self, variant: ModelVariant) -> Result<&Model> {
        self.models
            .get(&variant)
            .ok_or_else(|| self.not_ready(variant))
    }

    pub fn predict(&self, variant: ModelVariant, features: &[Vec<f64>]) -> Result<Predictions> {
        self.model(variant)?.predict(features)
    }

    /// 丢弃内存中的模型，返回是否存在
    pub fn evict(&mut self, variant: ModelVariant) -> bool {
        self.models.remove(&variant).is_some()
    }

    fn not_ready(&self, variant: ModelVariant) -> ExtractError {
        ExtractError::ModelNotReady {
            variant,
            location: self.store.locate(variant.blob_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, LocatedToken, Token};
    use crate::store::{FsBlobStore, MemoryBlobStore};

    fn dataset() -> Dataset {
        let mut dataset = Dataset::new(vec!["a".to_string(), "b".to_string()]);
        let rows = [
            (vec![1.0, 0.1], Category::Others),
            (vec![0.9, 0.2], Category::Others),
            (vec![0.1, 1.0], Category::InvoiceNumber),
            (vec![0.2, 0.9], Category::InvoiceNumber),
        ];
        for (i, (row, category)) in rows.into_iter().enumerate() {
            let token = LocatedToken {
                document: "doc".to_string(),
                page: 0,
                position: i,
                token: Token::new(format!("t{}", i)),
            };
            dataset.push(row, category, token);
        }
        dataset
    }

    #[test]
    fn unknown_variant_is_not_ready() {
        let registry = ModelRegistry::new(MemoryBlobStore::new());
        let err = registry
            .predict(ModelVariant::NaiveBayes, &[vec![1.0, 0.0]])
            .unwrap_err();
        match err {
            ExtractError::ModelNotReady { variant, location } => {
                assert_eq!(variant, ModelVariant::NaiveBayes);
                assert_eq!(location, "memory://nb_model");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_without_blob_is_not_ready() {
        let mut registry = ModelRegistry::new(MemoryBlobStore::new());
        let err = registry.load(ModelVariant::RandomForest).unwrap_err();
        assert!(err.to_string().contains("Random Forest"));
        assert!(!registry.is_ready(ModelVariant::RandomForest));
    }

    #[test]
    fn reload_gives_identical_predictions() {
        let mut registry = ModelRegistry::new(MemoryBlobStore::new());
        let data = dataset();
        let before = registry
            .train(ModelVariant::NaiveBayes, &data)
            .unwrap()
            .predict(&data.features)
            .unwrap();
        assert_eq!(registry.store().len(), 1);

        assert!(registry.evict(ModelVariant::NaiveBayes));
        assert!(!registry.is_ready(ModelVariant::NaiveBayes));

        registry.load(ModelVariant::NaiveBayes).unwrap();
        let after = registry.predict(ModelVariant::NaiveBayes, &data.features).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn persist_failure_keeps_model_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut registry = ModelRegistry::new(FsBlobStore::new(blocker.join("models")));
        let err = registry.train(ModelVariant::NaiveBayes, &dataset()).unwrap_err();
        assert!(matches!(err, ExtractError::Persistence { .. }));
        assert!(registry.is_ready(ModelVariant::NaiveBayes));
        assert!(registry.predict(ModelVariant::NaiveBayes, &[vec![1.0, 0.0]]).is_ok());
    }

    #[test]
    fn empty_dataset_is_a_training_error() {
        let mut registry = ModelRegistry::new(MemoryBlobStore::new());
        let empty = Dataset::new(vec!["a".to_string()]);
        let err = registry.train(ModelVariant::RandomForest, &empty).unwrap_err();
        assert!(matches!(err, ExtractError::Training { .. }));
    }
}
