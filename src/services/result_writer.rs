//! 结果写出服务 - 业务能力层
//!
//! 只负责"把结果落盘"能力：结果表（CSV）与 JSON 报告，均为原子写入。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::infrastructure::atomic_file::write_atomically;
use crate::models::loaders::result_table::{
    CLASSIFIED_AT_COLUMN, CONFIDENCE_COLUMN, ERROR_KIND_COLUMN, NOTES_COLUMN, STATUS_COLUMN,
};
use crate::models::tag_cell::format_tags;
use crate::models::{Case, CaseOutcome, Schema};

/// 与结果列同名的元数据列的前缀
pub const METADATA_PREFIX: &str = "meta_";

/// 结果写出服务
///
/// 职责：
/// - 按"ID、文本、元数据、各类别、置信度、备注、状态"的列顺序写结果表
/// - 写阶段报告、分析结果等 JSON 文档
/// - 不关心流程顺序
pub struct ResultWriter {
    output_dir: PathBuf,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 写结果表，每个案例一行（按 `cases` 的顺序）；没有终态结果的案例不写
    pub fn write_table(
        &self,
        file_name: &str,
        columns: &TableColumns<'_>,
        cases: &[Case],
        outcomes: &HashMap<&str, &CaseOutcome>,
        schema: &Schema,
    ) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        let metadata_columns = columns.passthrough_metadata(schema);

        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<&str> = vec![columns.id, columns.text];
        header.extend(metadata_columns.iter().map(|(_, header)| header.as_str()));
        header.extend(schema.category_names());
        header.extend([
            CONFIDENCE_COLUMN,
            NOTES_COLUMN,
            STATUS_COLUMN,
            ERROR_KIND_COLUMN,
            CLASSIFIED_AT_COLUMN,
        ]);
        writer.write_record(&header)?;

        let mut rows = 0usize;
        for case in cases {
            let Some(outcome) = outcomes.get(case.id.as_str()) else {
                continue;
            };

            let mut record: Vec<String> = vec![case.id.clone(), case.text.clone()];
            record.extend(
                metadata_columns
                    .iter()
                    .map(|(column, _)| case.metadata_value(column).unwrap_or("").to_string()),
            );

            match outcome {
                CaseOutcome::Succeeded(result) => {
                    record.extend(
                        schema
                            .category_names()
                            .map(|category| format_tags(result.tags_for(category))),
                    );
                    record.push(result.confidence.to_string());
                    record.push(result.notes.clone());
                    record.push(outcome.status_label().to_string());
                    record.push(String::new());
                    record.push(result.classified_at.to_rfc3339());
                }
                CaseOutcome::Failed(failed) => {
                    record.extend(schema.category_names().map(|_| String::new()));
                    record.push(String::new());
                    record.push(failed.message.clone());
                    record.push(outcome.status_label().to_string());
                    record.push(failed.kind.to_string());
                    record.push(String::new());
                }
            }

            writer.write_record(&record)?;
            rows += 1;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("结果表序列化失败: {}", e))?;
        write_atomically(&path, &bytes)
            .with_context(|| format!("写入结果表失败: {}", path.display()))?;

        debug!("已写入结果表 {} ({} 行)", path.display(), rows);
        Ok(path)
    }

    /// 以两空格缩进写 JSON 文档
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        write_json_to(&path, value)?;
        Ok(path)
    }
}

/// 写 JSON 文档到指定路径（原子写入）
pub fn write_json_to<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("JSON 序列化失败")?;
    bytes.push(b'\n');
    write_atomically(path, &bytes).with_context(|| format!("写入失败: {}", path.display()))
}

/// 结果表的输入列信息
pub struct TableColumns<'a> {
    pub id: &'a str,
    pub text: &'a str,
    pub metadata: &'a [String],
}

impl<'a> TableColumns<'a> {
    /// 透传的元数据列：(数据集列名, 结果表列名)
    ///
    /// 与类别列或固定列同名的列加上 `meta_` 前缀后写入。
    fn passthrough_metadata(&self, schema: &Schema) -> Vec<(&'a str, String)> {
        let reserved = [
            self.id,
            self.text,
            CONFIDENCE_COLUMN,
            NOTES_COLUMN,
            STATUS_COLUMN,
            ERROR_KIND_COLUMN,
            CLASSIFIED_AT_COLUMN,
        ];
        self.metadata
            .iter()
            .map(String::as_str)
            .map(|column| {
                if reserved.contains(&column) || schema.category(column).is_some() {
                    let renamed = format!("{}{}", METADATA_PREFIX, column);
                    warn!("⚠️ 元数据列 {} 与结果列同名，写入为 {}", column, renamed);
                    (column, renamed)
                } else {
                    (column, column.to_string())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClassificationResult, ErrorKind, FailedCase, ResultTable, SchemaDocument,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_table_layout_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SchemaDocument::parse(
            r#"{"crime_type": {"fraud": ["job_fraud", "loan_fraud"]}, "platform": {"apps": ["whatsapp"]}}"#,
        )
        .unwrap()
        .unwrap()
        .schema;

        let mut first = Case::new("1", "text one");
        first.metadata = vec![
            ("district".to_string(), "North".to_string()),
            ("status".to_string(), "open".to_string()),
        ];
        let mut second = Case::new("2", "text two");
        second.metadata = vec![("district".to_string(), "South".to_string())];
        let cases = vec![first, second, Case::new("3", "pending")];

        let succeeded = CaseOutcome::Succeeded(ClassificationResult {
            case_id: "1".to_string(),
            tags: BTreeMap::from([
                (
                    "crime_type".to_string(),
                    vec!["job_fraud".to_string(), "loan_fraud".to_string()],
                ),
                ("platform".to_string(), vec![]),
            ]),
            confidence: 0.75,
            notes: "clear".to_string(),
            classified_at: Utc::now(),
            violations: vec![],
        });
        let failed = CaseOutcome::Failed(FailedCase {
            case_id: "2".to_string(),
            kind: ErrorKind::Timeout,
            message: "调用超时".to_string(),
            raw_output: None,
            attempts: 4,
        });
        let outcomes: HashMap<&str, &CaseOutcome> = HashMap::from([("1", &succeeded), ("2", &failed)]);

        let metadata = vec!["district".to_string(), "status".to_string()];
        let columns = TableColumns {
            id: "id",
            text: "text",
            metadata: &metadata,
        };
        let path = ResultWriter::new(dir.path())
            .write_table("classified.csv", &columns, &cases, &outcomes, &schema)
            .unwrap();

        let table = ResultTable::load(&path, "id").unwrap();
        assert_eq!(
            table.headers(),
            [
                "id", "text", "district", "meta_status", "crime_type", "platform", "confidence",
                "notes", "status", "error_kind", "classified_at"
            ]
        );
        assert_eq!(table.len(), 2);
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows[0].tags("crime_type"), vec!["job_fraud", "loan_fraud"]);
        assert_eq!(rows[0].cell("confidence"), Some("0.75"));
        assert!(!rows[0].is_failed());
        assert!(rows[1].is_failed());
        assert_eq!(rows[1].cell("error_kind"), Some("timeout"));
        assert_eq!(rows[1].cell("district"), Some("South"));
        // 与结果列同名的元数据改名保留，不会覆盖状态列
        assert_eq!(rows[0].cell("meta_status"), Some("open"));
        assert_eq!(rows[0].cell("status"), Some("succeeded"));
        assert_eq!(rows[1].cell("meta_status"), Some(""));
    }

    #[test]
    fn test_write_json_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("nested/output"));
        let path = writer
            .write_json("report.json", &serde_json::json!({"ok": true}))
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.ends_with("}\n"));
    }
}
