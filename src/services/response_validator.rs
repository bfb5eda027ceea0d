//! 回复校验服务 - 业务能力层
//!
//! 预言机的原始输出是不可信的半结构化文本。这里是唯一把它变成
//! `ClassificationResult` 的地方：
//!
//! - 不是合法 JSON、缺少必需字段、case_id 不符 → 解析失败（可重试）
//! - 标签不在该类别的扁平化集合中 → 丢弃并记录越界，案例仍然成功
//! - 置信度超出 [0, 1] → 收敛到边界
//! - 所有类别都没有有效标签 → 仍然成功

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{ClassificationResult, ErrorKind, FailedCase, Schema, SchemaViolation};

/// 回复校验器（持有本阶段的分类体系快照）
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    schema: Arc<Schema>,
}

impl ResponseValidator {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// 校验一条原始回复
    ///
    /// 失败时返回的 `FailedCase` 保留原始回复用于审计，`attempts` 由调用方填写。
    pub fn validate(&self, case_id: &str, raw: &str) -> Result<ClassificationResult, FailedCase> {
        let object = self
            .parse_object(case_id, raw)
            .map_err(|reason| parse_failure(case_id, raw, reason))?;
        self.build_result(case_id, &object)
            .map_err(|reason| parse_failure(case_id, raw, reason))
    }

    fn parse_object(&self, case_id: &str, raw: &str) -> Result<Map<String, Value>, String> {
        let body = extract_json_object(raw).ok_or_else(|| "回复中没有 JSON 对象".to_string())?;
        let value: Value =
            serde_json::from_str(body).map_err(|e| format!("JSON 解析失败: {}", e))?;
        let Value::Object(object) = value else {
            return Err("回复不是 JSON 对象".to_string());
        };

        if let Some(reply_id) = object.get("case_id") {
            let reply_id = match reply_id {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if !reply_id.is_empty() && reply_id != case_id {
                return Err(format!("回复的 case_id ({}) 与请求不符", reply_id));
            }
        }

        Ok(object)
    }

    fn build_result(
        &self,
        case_id: &str,
        object: &Map<String, Value>,
    ) -> Result<ClassificationResult, String> {
        let mut tags = BTreeMap::new();
        let mut violations = Vec::new();

        for category in self.schema.categories() {
            let values = object
                .get(&category.name)
                .ok_or_else(|| format!("缺少类别字段: {}", category.name))?
                .as_array()
                .ok_or_else(|| format!("类别字段 {} 不是数组", category.name))?;

            let mut seen = HashSet::new();
            let mut kept = Vec::new();
            for value in values {
                let tag = value
                    .as_str()
                    .ok_or_else(|| format!("类别字段 {} 含有非字符串元素", category.name))?
                    .trim();
                if tag.is_empty() || !seen.insert(tag.to_string()) {
                    continue;
                }
                if self.schema.contains_tag(&category.name, tag) {
                    kept.push(tag.to_string());
                } else {
                    warn!(
                        "[案例 {}] ⚠️ 标签 {} 不属于类别 {}，已丢弃",
                        case_id, tag, category.name
                    );
                    violations.push(SchemaViolation {
                        case_id: case_id.to_string(),
                        category: category.name.clone(),
                        tag: tag.to_string(),
                    });
                }
            }
            tags.insert(category.name.clone(), kept);
        }

        let confidence = object
            .get("confidence_score")
            .and_then(Value::as_f64)
            .ok_or_else(|| "缺少数值字段: confidence_score".to_string())?;
        let clamped = confidence.clamp(0.0, 1.0);
        if clamped != confidence {
            warn!(
                "[案例 {}] 置信度 {} 超出 [0, 1]，已收敛为 {}",
                case_id, confidence, clamped
            );
        }

        let notes = match object.get("notes") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Ok(ClassificationResult {
            case_id: case_id.to_string(),
            tags,
            confidence: clamped,
            notes,
            classified_at: Utc::now(),
            violations,
        })
    }
}

fn parse_failure(case_id: &str, raw: &str, reason: String) -> FailedCase {
    FailedCase {
        case_id: case_id.to_string(),
        kind: ErrorKind::Parse,
        message: reason,
        raw_output: Some(raw.to_string()),
        attempts: 1,
    }
}

/// 取出回复中的 JSON 对象：优先代码块，其次最外层的 `{...}`
fn extract_json_object(raw: &str) -> Option<&str> {
    if let Ok(re) = Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```") {
        if let Some(body) = re.captures(raw).and_then(|c| c.get(1)) {
            return Some(body.as_str());
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}
