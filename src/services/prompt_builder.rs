//! 提示词构建服务 - 业务能力层
//!
//! 只负责把"一个案例 + 分类体系快照 + 自定义规则"拼装成请求，不含任何业务判断。
//!
//! ## 职责
//! - 按体系顺序列出每个类别的扁平化标签（从不出现子类名）
//! - 原样嵌入自定义规则
//! - 给出包含全部类别键、`confidence_score`、`notes` 的回复模板

use std::fmt::Write as _;
use std::sync::Arc;

use crate::clients::oracle::ClassificationPrompt;
use crate::models::{Case, Schema};

const SYSTEM_MESSAGE: &str = "You are a careful case classification assistant. \
You label free-text case descriptions with tags taken strictly from a fixed taxonomy \
and always answer with a single JSON object.";

const GENERIC_RULES: &str = "\
1. Use ONLY the specific values from the lists above; never invent new values
2. For each category, select ALL applicable values
3. Each field holds 0 or more values as a JSON list
4. If no value fits a category, use an empty list []
5. A case can have multiple applicable values per category
6. confidence_score must be between 0.0 and 1.0 and reflect how clear the case is
7. Use notes for reasoning, unique aspects or uncertainty";

/// 提示词构建器
///
/// 持有本阶段的分类体系快照（只读）和自定义规则文本。
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    schema: Arc<Schema>,
    custom_rules: String,
}

impl PromptBuilder {
    pub fn new(schema: Arc<Schema>, custom_rules: impl Into<String>) -> Self {
        Self {
            schema,
            custom_rules: custom_rules.into(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// 为单个案例构建请求
    pub fn build(&self, case: &Case) -> ClassificationPrompt {
        let mut user = String::new();

        let _ = writeln!(
            user,
            "Analyze this case and classify it using the taxonomy values below.\n"
        );
        let _ = writeln!(user, "CASE ID: {}", case.id);
        let _ = writeln!(user, "CASE DESCRIPTION: {}\n", case.text.trim());

        let _ = writeln!(user, "ALLOWED VALUES PER CATEGORY:");
        let _ = writeln!(user, "{}\n", self.flattened_values_json());

        let _ = writeln!(user, "CLASSIFICATION RULES:");
        let _ = writeln!(user, "{}", GENERIC_RULES);
        if !self.custom_rules.trim().is_empty() {
            let _ = writeln!(user);
            let _ = writeln!(user, "{}", self.custom_rules);
        }

        let _ = writeln!(user, "\nReply using exactly this JSON format:\n");
        let _ = writeln!(user, "{}", self.reply_template(&case.id));
        let _ = write!(user, "\nReturn only the JSON response.");

        ClassificationPrompt {
            case_id: case.id.clone(),
            system: SYSTEM_MESSAGE.to_string(),
            user,
        }
    }

    /// 各类别的扁平化标签，按体系顺序输出为 JSON 对象
    fn flattened_values_json(&self) -> String {
        let mut out = String::from("{\n");
        let categories = self.schema.categories();
        for (idx, category) in categories.iter().enumerate() {
            let values: Vec<&str> = category.flattened().collect();
            let _ = write!(
                out,
                "  {}: {}",
                json_string(&category.name),
                serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string())
            );
            out.push_str(if idx + 1 < categories.len() { ",\n" } else { "\n" });
        }
        out.push('}');
        out
    }

    fn reply_template(&self, case_id: &str) -> String {
        let mut out = String::from("{\n");
        let _ = writeln!(out, "  \"case_id\": {},", json_string(case_id));
        for category in self.schema.categories() {
            let _ = writeln!(
                out,
                "  {}: [\"values from the {} list\"],",
                json_string(&category.name),
                category.name
            );
        }
        out.push_str("  \"confidence_score\": 0.85,\n");
        out.push_str("  \"notes\": \"any additional observations about this case\"\n");
        out.push('}');
        out
    }
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}
