//! # Case Tagger
//!
//! 一个可恢复的、基于分类体系的 LLM 批量案例打标工具
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `CheckpointManager` - 阶段进度的唯一写者，原子提交
//! - `RateLimiter` - 全进程共享的调用速率预算
//!
//! ### ② 业务能力层（Services / Clients）
//! - `services/` - 描述"我能做什么"，只处理单个案例或单张表
//! - `PromptBuilder` - 分类体系 → 提示词
//! - `ResponseValidator` - 不可信回复 → 已校验结果
//! - `SchemaMerger` / `TagAnalyzer` - 体系演进与标签统计
//! - `clients/` - `Oracle` 接口及其 LLM 实现
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个案例"的处理流程
//! - `CaseTracker` - 单个案例的状态机（含重试预算）
//! - `CaseFlow` - 一次尝试（节流 → 调用 → 校验）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 分类阶段：分批、并发、检查点
//! - `orchestrator/schema_update` - 分类体系更新
//! - `orchestrator/tag_report` - 标签分布报告
//!
//! ## 模块结构

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ClassificationPrompt, LlmClient, Oracle};
pub use config::Config;
pub use error::{AppError, AppResult, OracleError};
pub use models::{Case, CaseOutcome, ClassificationResult, FailedCase, Schema, SchemaDocument};
pub use orchestrator::{StageOptions, StageReport, StageRunner};
