//! 基础设施层（Infrastructure）
//!
//! 持有跨案例共享的稀缺资源，只暴露能力：
//! - `CheckpointManager` - 阶段进度的唯一写者
//! - `RateLimiter` - 全进程共享的调用速率预算
//! - `atomic_file` - 所有持久化产物共用的原子写

pub mod atomic_file;
pub mod checkpoint;
pub mod rate_limiter;

pub use checkpoint::{CheckpointManager, CheckpointState};
pub use rate_limiter::RateLimiter;
