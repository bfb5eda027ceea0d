pub mod case;
pub mod loaders;
pub mod outcome;
pub mod schema;
pub mod tag_cell;

pub use case::Case;
pub use loaders::{load_cases, load_schema, CaseDataset, ResultTable};
pub use outcome::{CaseOutcome, ClassificationResult, ErrorKind, FailedCase, SchemaViolation};
pub use schema::{Category, Schema, SchemaDocument, Subcategory};
