use std::path::{Path, PathBuf};

use crate::error::DataFileError;
use crate::models::tag_cell::parse_tags;

/// 结果表固定列名
pub const CONFIDENCE_COLUMN: &str = "confidence";
pub const NOTES_COLUMN: &str = "notes";
pub const STATUS_COLUMN: &str = "status";
pub const ERROR_KIND_COLUMN: &str = "error_kind";
pub const CLASSIFIED_AT_COLUMN: &str = "classified_at";

pub const STATUS_FAILED: &str = "failed";

/// 已读入内存的结果表（可能经过人工编辑）
#[derive(Debug, Clone)]
pub struct ResultTable {
    pub source: PathBuf,
    headers: Vec<String>,
    id_idx: usize,
    records: Vec<csv::StringRecord>,
}

/// 结果表中的一行
pub struct ResultRow<'a> {
    table: &'a ResultTable,
    record: &'a csv::StringRecord,
}

impl ResultTable {
    /// 读取结果表；ID 列必须存在，其余列缺失时按"零个标签"处理
    pub fn load(path: &Path, id_column: &str) -> Result<Self, DataFileError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| DataFileError::csv(path, e))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DataFileError::csv(path, e))?
            .iter()
            .map(str::to_string)
            .collect();
        let id_idx = headers
            .iter()
            .position(|h| h == id_column)
            .ok_or_else(|| DataFileError::missing_column(path, id_column))?;

        let records = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DataFileError::csv(path, e))?;

        Ok(Self {
            source: path.to_path_buf(),
            headers,
            id_idx,
            records,
        })
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.records
            .iter()
            .map(move |record| ResultRow { table: self, record })
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }
}

impl<'a> ResultRow<'a> {
    pub fn case_id(&self) -> &'a str {
        self.record.get(self.table.id_idx).unwrap_or("").trim()
    }

    pub fn cell(&self, column: &str) -> Option<&'a str> {
        self.table
            .column_index(column)
            .and_then(|idx| self.record.get(idx))
    }

    /// 某类别列中的标签；列缺失或内容无法识别时为空
    pub fn tags(&self, category: &str) -> Vec<String> {
        self.cell(category).map(parse_tags).unwrap_or_default()
    }

    /// 是否被标记为失败行（没有 status 列的表视为全部有效）
    pub fn is_failed(&self) -> bool {
        self.cell(STATUS_COLUMN)
            .is_some_and(|status| status.trim().eq_ignore_ascii_case(STATUS_FAILED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_rows_expose_tags_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classified.csv");
        fs::write(
            &path,
            "id,crime_type,status\n\
             1,\"job_fraud, loan_fraud\",succeeded\n\
             2,,failed\n",
        )
        .unwrap();

        let table = ResultTable::load(&path, "id").unwrap();
        assert_eq!(table.len(), 2);
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows[0].case_id(), "1");
        assert_eq!(rows[0].tags("crime_type"), vec!["job_fraud", "loan_fraud"]);
        assert!(!rows[0].is_failed());
        assert!(rows[1].is_failed());
        assert!(rows[0].tags("missing_column").is_empty());
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classified.csv");
        fs::write(&path, "id,crime_type\n1\n2,job_fraud\n").unwrap();

        let table = ResultTable::load(&path, "id").unwrap();
        let rows: Vec<_> = table.rows().collect();
        assert!(rows[0].tags("crime_type").is_empty());
        assert_eq!(rows[1].tags("crime_type"), vec!["job_fraud"]);
    }
}
