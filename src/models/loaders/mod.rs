pub mod dataset_loader;
pub mod result_table;
pub mod schema_loader;

pub use dataset_loader::{load_cases, CaseDataset};
pub use result_table::{ResultRow, ResultTable};
pub use schema_loader::{load_instructions, load_schema, log_schema_summary, save_schema};
