pub mod llm_client;
pub mod oracle;

pub use llm_client::LlmClient;
pub use oracle::{ClassificationPrompt, Oracle};
