//! 分类预言机接口
//!
//! 预言机对流程层是不透明的：文本 + 分类体系 → 结构化回复，可能失败、超时或被限流。
//! 生产环境由 `LlmClient` 实现，测试中用脚本化的实现替换。

use async_trait::async_trait;

use crate::error::OracleError;

/// 一次分类请求（由 `PromptBuilder` 组装）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationPrompt {
    pub case_id: String,
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// 发送请求并返回原始回复文本（未经校验）
    async fn classify(&self, prompt: &ClassificationPrompt) -> Result<String, OracleError>;
}
