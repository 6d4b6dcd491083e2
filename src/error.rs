use crate::classifier::ModelVariant;

/// 抽取流水线统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(
        "model '{variant}' is not ready: it has not been trained or loaded. \
         Call train() for this variant, or place a trained blob at '{location}' and load it"
    )]
    ModelNotReady {
        variant: ModelVariant,
        location: String,
    },

    #[error("persistence failure for blob '{name}': {source}")]
    Persistence {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("feature mismatch: {0}")]
    FeatureMismatch(String),

    #[error("token {position} on page {page} of '{document}' has no ground-truth category")]
    MissingLabel {
        document: String,
        page: usize,
        position: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("training '{variant}' failed: {message}")]
    Training {
        variant: ModelVariant,
        message: String,
    },

    #[error("corpus error at '{path}': {message}")]
    Corpus { path: String, message: String },
}

impl ExtractError {
    pub(crate) fn persistence(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ExtractError::Persistence {
            name: name.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
