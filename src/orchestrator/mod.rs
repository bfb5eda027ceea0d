//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//! 三个入口彼此独立，都可以安全地重复运行。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 分类阶段处理器
//! - 选择案例、加载/创建检查点
//! - 控制并发数量（Semaphore）和全局调用速率
//! - 每批提交检查点，完成后写结果表与报告
//!
//! ### `schema_update` - 分类体系更新
//! - 结果表中的新标签 → 兜底子类
//! - 备份原文件、原子写入新体系
//!
//! ### `tag_report` - 标签分布报告
//! - 多张结果表的并集统计
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Case>)
//!     ↓
//! workflow::CaseFlow + CaseTracker (处理单个 Case)
//!     ↓
//! services (能力层：prompt / validate / write)
//!     ↓
//! infrastructure (基础设施：checkpoint / rate limiter)
//! ```

pub mod batch_processor;
pub mod schema_update;
pub mod tag_report;

// 重新导出主要类型
pub use batch_processor::{StageOptions, StageReport, StageRunner};
pub use schema_update::{run_schema_update, MergeOptions, MergeReport};
pub use tag_report::{run_tag_analysis, AnalyzeOptions};
