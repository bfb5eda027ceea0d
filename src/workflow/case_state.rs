//! 单个案例的状态机 - 流程层
//!
//! ```text
//! Pending → InFlight → Succeeded
//!                    → Retryable → InFlight → ...
//!                    → Failed（终态）
//! ```
//!
//! 可重试的失败在同一轮运行内重新排队，预算用完后转为终态失败。
//! 终态之后不允许任何转移，同一案例至多成功一次。

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::{CaseOutcome, ClassificationResult, ErrorKind, FailedCase};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// 一次调用尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Succeeded(ClassificationResult),
    Failed {
        kind: ErrorKind,
        message: String,
        raw_output: Option<String>,
        /// 服务端给出的最短等待时间
        retry_after: Option<Duration>,
    },
}

impl AttemptResult {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        AttemptResult::Failed {
            kind,
            message: message.into(),
            raw_output: None,
            retry_after: None,
        }
    }
}

/// 案例状态
#[derive(Debug, Clone, PartialEq)]
pub enum CaseState {
    Pending,
    InFlight { attempt: u32 },
    /// 可重试失败，等待 `delay` 后重新调用
    Retryable { last: FailedCase, delay: Duration },
    Succeeded(ClassificationResult),
    Failed(FailedCase),
}

impl CaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Succeeded(_) | CaseState::Failed(_))
    }

    fn label(&self) -> &'static str {
        match self {
            CaseState::Pending => "pending",
            CaseState::InFlight { .. } => "in_flight",
            CaseState::Retryable { .. } => "retryable",
            CaseState::Succeeded(_) => "succeeded",
            CaseState::Failed(_) => "failed",
        }
    }
}

/// 非法的状态转移
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("未知的案例: {0}")]
    UnknownCase(String),
    #[error("案例 {case_id} 处于 {from} 状态，不能执行 {action}")]
    InvalidTransition {
        case_id: String,
        from: &'static str,
        action: &'static str,
    },
}

/// 一次失败之后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Succeeded,
    Requeue { delay: Duration },
    Terminal,
}

/// 重试预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 网络/限流/超时的最大重试次数
    pub max_retries: u32,
    /// 解析失败的最大重试次数
    pub parse_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            parse_retries: config.parse_retries,
            backoff: config.retry_backoff(),
        }
    }

    /// 第 `attempt` 次尝试（≥ 2）之前的退避：backoff × 2^(attempt−2)，上限 60 秒
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug)]
struct Entry {
    state: CaseState,
    attempts: u32,
    parse_failures: u32,
    transport_failures: u32,
}

/// 一个批次内所有案例的状态
#[derive(Debug)]
pub struct CaseTracker {
    order: Vec<String>,
    entries: HashMap<String, Entry>,
    policy: RetryPolicy,
}

impl CaseTracker {
    pub fn new(case_ids: impl IntoIterator<Item = String>, policy: RetryPolicy) -> Self {
        let mut order = Vec::new();
        let mut entries = HashMap::new();
        for id in case_ids {
            if entries.contains_key(&id) {
                continue;
            }
            entries.insert(
                id.clone(),
                Entry {
                    state: CaseState::Pending,
                    attempts: 0,
                    parse_failures: 0,
                    transport_failures: 0,
                },
            );
            order.push(id);
        }
        Self {
            order,
            entries,
            policy,
        }
    }

    pub fn state(&self, case_id: &str) -> Option<&CaseState> {
        self.entries.get(case_id).map(|e| &e.state)
    }

    /// 等待调用的案例（Pending 或 Retryable），按原顺序
    pub fn runnable(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.entries.get(*id).is_some_and(|e| {
                    matches!(e.state, CaseState::Pending | CaseState::Retryable { .. })
                })
            })
            .cloned()
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.entries.values().all(|e| e.state.is_terminal())
    }

    /// Pending/Retryable → InFlight，返回 (尝试序号, 调用前需要等待的时间)
    pub fn start(&mut self, case_id: &str) -> Result<(u32, Duration), StateError> {
        let entry = self
            .entries
            .get_mut(case_id)
            .ok_or_else(|| StateError::UnknownCase(case_id.to_string()))?;

        let delay = match &entry.state {
            CaseState::Pending => Duration::ZERO,
            CaseState::Retryable { delay, .. } => *delay,
            other => {
                return Err(StateError::InvalidTransition {
                    case_id: case_id.to_string(),
                    from: other.label(),
                    action: "start",
                })
            }
        };

        entry.attempts += 1;
        entry.state = CaseState::InFlight {
            attempt: entry.attempts,
        };
        Ok((entry.attempts, delay))
    }

    /// InFlight → Succeeded / Retryable / Failed
    pub fn finish(
        &mut self,
        case_id: &str,
        result: AttemptResult,
    ) -> Result<Transition, StateError> {
        let policy = self.policy;
        let entry = self
            .entries
            .get_mut(case_id)
            .ok_or_else(|| StateError::UnknownCase(case_id.to_string()))?;

        if !matches!(entry.state, CaseState::InFlight { .. }) {
            return Err(StateError::InvalidTransition {
                case_id: case_id.to_string(),
                from: entry.state.label(),
                action: "finish",
            });
        }

        let (kind, message, raw_output, retry_after) = match result {
            AttemptResult::Succeeded(result) => {
                entry.state = CaseState::Succeeded(result);
                return Ok(Transition::Succeeded);
            }
            AttemptResult::Failed {
                kind,
                message,
                raw_output,
                retry_after,
            } => (kind, message, raw_output, retry_after),
        };

        let within_budget = match kind {
            ErrorKind::Parse => {
                entry.parse_failures += 1;
                entry.parse_failures <= policy.parse_retries
            }
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Timeout => {
                entry.transport_failures += 1;
                entry.transport_failures <= policy.max_retries
            }
            ErrorKind::Rejected | ErrorKind::Internal => false,
        };

        let failed = FailedCase {
            case_id: case_id.to_string(),
            kind,
            message,
            raw_output,
            attempts: entry.attempts,
        };

        if kind.is_retryable() && within_budget {
            let delay = policy
                .backoff_before(entry.attempts + 1)
                .max(retry_after.unwrap_or(Duration::ZERO));
            info!(
                "[案例 {}] 🔁 {} 失败，{:?} 后重新排队 (已尝试 {} 次)",
                case_id, kind, delay, entry.attempts
            );
            entry.state = CaseState::Retryable {
                last: failed,
                delay,
            };
            Ok(Transition::Requeue { delay })
        } else {
            warn!(
                "[案例 {}] ❌ 终态失败: {} - {} (共尝试 {} 次)",
                case_id, kind, failed.message, entry.attempts
            );
            entry.state = CaseState::Failed(failed);
            Ok(Transition::Terminal)
        }
    }

    /// 按原顺序取出所有终态结果；存在未到终态的案例时报错
    pub fn into_outcomes(mut self) -> Result<Vec<CaseOutcome>, StateError> {
        let mut outcomes = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let entry = self
                .entries
                .remove(id)
                .ok_or_else(|| StateError::UnknownCase(id.clone()))?;
            match entry.state {
                CaseState::Succeeded(result) => outcomes.push(CaseOutcome::Succeeded(result)),
                CaseState::Failed(failed) => outcomes.push(CaseOutcome::Failed(failed)),
                other => {
                    return Err(StateError::InvalidTransition {
                        case_id: id.clone(),
                        from: other.label(),
                        action: "collect",
                    })
                }
            }
        }
        Ok(outcomes)
    }
}
