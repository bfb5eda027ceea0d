pub mod case_ctx;
pub mod case_flow;
pub mod case_state;

pub use case_ctx::CaseCtx;
pub use case_flow::CaseFlow;
pub use case_state::{AttemptResult, CaseState, CaseTracker, RetryPolicy, StateError, Transition};
