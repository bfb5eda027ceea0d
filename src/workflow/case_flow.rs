//! 案例分类流程 - 流程层
//!
//! 核心职责：定义"一个案例的一次尝试"
//!
//! 流程顺序：
//! 1. 退避等待（重试时，不占用并发名额）
//! 2. 领取并发名额和全局调用时间片
//! 3. 调用预言机（带超时）
//! 4. 校验回复

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::clients::Oracle;
use crate::error::OracleError;
use crate::infrastructure::RateLimiter;
use crate::models::{Case, ErrorKind};
use crate::services::{PromptBuilder, ResponseValidator};
use crate::utils::logging::truncate_text;
use crate::workflow::case_ctx::CaseCtx;
use crate::workflow::case_state::AttemptResult;

/// 案例分类流程
///
/// - 不持有任何进度状态，重试决策由 `CaseTracker` 做出
/// - 共享的资源（预言机、节流器）通过 Arc 持有
pub struct CaseFlow {
    oracle: Arc<dyn Oracle>,
    prompts: PromptBuilder,
    validator: ResponseValidator,
    limiter: Arc<RateLimiter>,
    call_timeout: Duration,
}

impl CaseFlow {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        prompts: PromptBuilder,
        validator: ResponseValidator,
        limiter: Arc<RateLimiter>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            prompts,
            validator,
            limiter,
            call_timeout,
        }
    }

    /// 退避结束后再领取并发名额，然后执行一次尝试
    pub async fn attempt_when_ready(
        &self,
        semaphore: Arc<Semaphore>,
        case: &Case,
        ctx: &CaseCtx,
        delay: Duration,
    ) -> AttemptResult {
        if !delay.is_zero() {
            debug!("{} 退避 {:?}", ctx, delay);
            tokio::time::sleep(delay).await;
        }

        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return AttemptResult::failed(ErrorKind::Internal, format!("并发名额不可用: {}", e))
            }
        };
        self.attempt(case, ctx).await
    }

    /// 执行一次尝试
    pub async fn attempt(&self, case: &Case, ctx: &CaseCtx) -> AttemptResult {
        if ctx.attempt == 1 {
            info!("{} 文本: {}", ctx, truncate_text(&case.text, 80));
        }

        let prompt = self.prompts.build(case);

        self.limiter.acquire().await;
        let reply = match tokio::time::timeout(self.call_timeout, self.oracle.classify(&prompt)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                warn!("{} ⚠️ 预言机调用失败: {}", ctx, err);
                return oracle_failure(&err);
            }
            Err(_) => {
                warn!("{} ⚠️ 调用超时 ({:?})", ctx, self.call_timeout);
                return AttemptResult::failed(
                    ErrorKind::Timeout,
                    format!("调用超时 ({}秒)", self.call_timeout.as_secs()),
                );
            }
        };

        match self.validator.validate(&case.id, &reply) {
            Ok(result) => {
                info!(
                    "{} ✓ 分类完成 (置信度 {:.2}, 标签 {} 个, 越界 {} 个)",
                    ctx,
                    result.confidence,
                    result.tags.values().map(Vec::len).sum::<usize>(),
                    result.violations.len()
                );
                AttemptResult::Succeeded(result)
            }
            Err(failed) => {
                warn!("{} ⚠️ 回复解析失败: {}", ctx, failed.message);
                AttemptResult::Failed {
                    kind: failed.kind,
                    message: failed.message,
                    raw_output: failed.raw_output,
                    retry_after: None,
                }
            }
        }
    }
}

fn oracle_failure(err: &OracleError) -> AttemptResult {
    let retry_after = match err {
        OracleError::RateLimited {
            retry_after_secs: Some(secs),
        } => Some(Duration::from_secs(*secs)),
        _ => None,
    };
    AttemptResult::Failed {
        kind: ErrorKind::from(err),
        message: err.to_string(),
        raw_output: None,
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClassificationPrompt;
    use crate::models::{Schema, SchemaDocument};
    use async_trait::async_trait;

    struct FixedOracle(Result<String, OracleError>);

    #[async_trait]
    impl Oracle for FixedOracle {
        async fn classify(&self, _prompt: &ClassificationPrompt) -> Result<String, OracleError> {
            self.0.clone()
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl Oracle for SlowOracle {
        async fn classify(&self, _prompt: &ClassificationPrompt) -> Result<String, OracleError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }
    }

    fn schema() -> Arc<Schema> {
        let doc = SchemaDocument::parse(r#"{"crime_type": {"fraud": ["job_fraud"]}}"#)
            .unwrap()
            .unwrap();
        Arc::new(doc.schema)
    }

    fn flow(oracle: Arc<dyn Oracle>, timeout: Duration) -> CaseFlow {
        let schema = schema();
        CaseFlow::new(
            oracle,
            PromptBuilder::new(schema.clone(), ""),
            ResponseValidator::new(schema),
            Arc::new(RateLimiter::new(Duration::ZERO)),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_valid_reply_succeeds() {
        let oracle = Arc::new(FixedOracle(Ok(
            r#"{"crime_type": ["job_fraud"], "confidence_score": 0.9, "notes": ""}"#.to_string(),
        )));
        let flow = flow(oracle, Duration::from_secs(1));
        let result = flow
            .attempt(&Case::new("1", "text"), &CaseCtx::new("1", 0, 1))
            .await;
        assert!(matches!(result, AttemptResult::Succeeded(r) if r.tags_for("crime_type") == ["job_fraud"]));
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_carried() {
        let oracle = Arc::new(FixedOracle(Err(OracleError::RateLimited {
            retry_after_secs: Some(3),
        })));
        let flow = flow(oracle, Duration::from_secs(1));
        let result = flow
            .attempt(&Case::new("1", "text"), &CaseCtx::new("1", 0, 1))
            .await;
        assert!(matches!(
            result,
            AttemptResult::Failed { kind: ErrorKind::RateLimit, retry_after: Some(d), .. } if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_backoff_does_not_hold_a_concurrency_slot() {
        let oracle = Arc::new(FixedOracle(Ok(
            r#"{"crime_type": [], "confidence_score": 0.5}"#.to_string(),
        )));
        let flow = Arc::new(flow(oracle, Duration::from_secs(1)));
        let semaphore = Arc::new(Semaphore::new(1));
        let delay = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let handles: Vec<_> = ["1", "2", "3"]
            .into_iter()
            .map(|id| {
                let flow = flow.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let ctx = CaseCtx::new(id, 0, 2);
                    flow.attempt_when_ready(semaphore, &Case::new(id, "text"), &ctx, delay)
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), AttemptResult::Succeeded(_)));
        }

        // 三个退避并行进行；若退避期间占着唯一的名额则至少需要 900ms
        assert!(started.elapsed() < Duration::from_millis(850));
    }

    #[tokio::test]
    async fn test_hung_call_times_out() {
        let flow = flow(Arc::new(SlowOracle), Duration::from_millis(20));
        let result = flow
            .attempt(&Case::new("1", "text"), &CaseCtx::new("1", 0, 1))
            .await;
        assert!(matches!(
            result,
            AttemptResult::Failed {
                kind: ErrorKind::Timeout,
                ..
            }
        ));
    }
}
