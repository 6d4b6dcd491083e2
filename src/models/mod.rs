pub mod assignment;
pub mod category;
pub mod dataset;
pub mod invoice;
pub mod report;

pub use assignment::{FieldAssignment, FieldAssignments};
pub use category::Category;
pub use dataset::{Dataset, TrainTestPacket};
pub use invoice::{BoundingBox, FeatureMap, Invoice, InvoicePage, LocatedToken, Token};
pub use report::{CategoryMetrics, ClassificationReport, InvoiceScore};
