pub mod classifier;
pub mod config;
pub mod corpus;
pub mod error;
pub mod features;
pub mod models;
pub mod report;
pub mod service;
pub mod store;

pub use classifier::{Model, ModelVariant, Predictions, TrainingSettings};
pub use config::AppConfig;
pub use error::{ExtractError, Result};
pub use features::{FeatureProvider, FeatureSet, PrecomputedFeatures};
pub use models::{Category, FieldAssignments, Invoice, InvoiceScore};
pub use service::{DatasetAssembler, Evaluator, FieldExtractor, ModelRegistry};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
