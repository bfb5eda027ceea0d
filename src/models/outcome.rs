//! 单个案例的终态结果
//!
//! 预言机的原始回复只有经过校验器才能变成这里的类型，下游永远看不到未校验的回复。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// 失败原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    Timeout,
    Parse,
    Rejected,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Internal => "internal",
        }
    }

    /// 是否允许在同一轮运行内重试
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Rejected | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&OracleError> for ErrorKind {
    fn from(err: &OracleError) -> Self {
        match err {
            OracleError::Network(_) => ErrorKind::Network,
            OracleError::RateLimited { .. } => ErrorKind::RateLimit,
            OracleError::Timeout { .. } => ErrorKind::Timeout,
            OracleError::Rejected(_) => ErrorKind::Rejected,
        }
    }
}

/// 被丢弃的越界标签（不在该类别的扁平化集合中）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub case_id: String,
    pub category: String,
    pub tag: String,
}

/// 成功的分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub case_id: String,
    /// 类别 → 标签（均属于该类别的扁平化集合）
    pub tags: BTreeMap<String, Vec<String>>,
    /// 已收敛到 [0, 1]
    pub confidence: f64,
    pub notes: String,
    pub classified_at: DateTime<Utc>,
    #[serde(default)]
    pub violations: Vec<SchemaViolation>,
}

impl ClassificationResult {
    pub fn tags_for(&self, category: &str) -> &[String] {
        self.tags.get(category).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// 失败的案例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCase {
    pub case_id: String,
    pub kind: ErrorKind,
    pub message: String,
    /// 原始回复（解析失败时保留以便审计）
    pub raw_output: Option<String>,
    pub attempts: u32,
}

/// 案例终态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Succeeded(ClassificationResult),
    Failed(FailedCase),
}

impl CaseOutcome {
    pub fn case_id(&self) -> &str {
        match self {
            CaseOutcome::Succeeded(result) => &result.case_id,
            CaseOutcome::Failed(failed) => &failed.case_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CaseOutcome::Succeeded(_))
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            CaseOutcome::Succeeded(_) => "succeeded",
            CaseOutcome::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_is_tagged_by_status() {
        let outcome = CaseOutcome::Failed(FailedCase {
            case_id: "7".to_string(),
            kind: ErrorKind::Parse,
            message: "bad json".to_string(),
            raw_output: Some("not json".to_string()),
            attempts: 2,
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "parse");

        let back: CaseOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
        assert_eq!(back.case_id(), "7");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Parse.is_retryable());
        assert!(!ErrorKind::Rejected.is_retryable());
        assert_eq!(
            ErrorKind::from(&OracleError::Timeout { secs: 1 }),
            ErrorKind::Timeout
        );
    }
}
