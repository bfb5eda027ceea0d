pub mod cost_estimator;
pub mod prompt_builder;
pub mod response_validator;
pub mod result_writer;
pub mod schema_merger;
pub mod tag_analyzer;

pub use cost_estimator::{CostEstimate, CostEstimator};
pub use prompt_builder::PromptBuilder;
pub use response_validator::ResponseValidator;
pub use result_writer::{ResultWriter, TableColumns};
pub use schema_merger::{MergePlan, SchemaMerger};
pub use tag_analyzer::{TagAnalyzer, TagDistribution};
