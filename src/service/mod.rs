pub mod dataset;
pub mod evaluation;
pub mod extractor;
pub mod registry;

pub use dataset::{split_train_test, DatasetAssembler, OthersBalancer};
pub use evaluation::{summarize, Evaluator};
pub use extractor::{reduce_predictions, FieldExtractor};
pub use registry::ModelRegistry;
