use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::error::DataFileError;
use crate::models::case::Case;

/// 案例数据集：案例列表 + 透传的元数据列名（保持原顺序）
#[derive(Debug, Clone)]
pub struct CaseDataset {
    pub cases: Vec<Case>,
    pub metadata_columns: Vec<String>,
}

impl CaseDataset {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|c| c.id.as_str())
    }
}

/// 从 CSV 加载案例
///
/// - 缺少 ID 列或文本列 → 错误
/// - ID 为空的行跳过并告警
/// - 重复 ID 保留第一行并告警
pub fn load_cases(
    path: &Path,
    id_column: &str,
    text_column: &str,
) -> Result<CaseDataset, DataFileError> {
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
    let text_idx = headers
        .iter()
        .position(|h| h == text_column)
        .ok_or_else(|| DataFileError::missing_column(path, text_column))?;

    let metadata_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != id_idx && *idx != text_idx)
        .map(|(idx, name)| (idx, name.clone()))
        .collect();

    let mut cases = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipped_empty = 0usize;
    let mut skipped_duplicate = 0usize;

    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataFileError::csv(path, e))?;
        let id = record.get(id_idx).unwrap_or("").trim().to_string();
        if id.is_empty() {
            skipped_empty += 1;
            warn!("⚠️ 第 {} 行缺少案例ID，已跳过", row_idx + 2);
            continue;
        }
        if !seen.insert(id.clone()) {
            skipped_duplicate += 1;
            warn!("⚠️ 案例ID {} 重复出现（第 {} 行），保留首次出现", id, row_idx + 2);
            continue;
        }

        let metadata = metadata_columns
            .iter()
            .map(|(idx, name)| (name.clone(), record.get(*idx).unwrap_or("").to_string()))
            .collect();

        cases.push(Case {
            id,
            text: record.get(text_idx).unwrap_or("").to_string(),
            metadata,
        });
    }

    info!(
        "✓ 从 {} 加载 {} 个案例 (跳过: 无ID {}, 重复 {})",
        path.display(),
        cases.len(),
        skipped_empty,
        skipped_duplicate
    );

    Ok(CaseDataset {
        cases,
        metadata_columns: metadata_columns.into_iter().map(|(_, name)| name).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_cases_with_metadata_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        fs::write(
            &path,
            "Case,District,Gist\n\
             c1,North,\"Victim lost money, via UPI\"\n\
             ,South,no id\n\
             c2,East,second\n\
             c1,West,duplicate\n",
        )
        .unwrap();

        let dataset = load_cases(&path, "Case", "Gist").unwrap();
        assert_eq!(dataset.metadata_columns, vec!["District"]);
        assert_eq!(dataset.ids().collect::<Vec<_>>(), vec!["c1", "c2"]);
        assert_eq!(dataset.cases[0].text, "Victim lost money, via UPI");
        assert_eq!(dataset.cases[0].metadata_value("District"), Some("North"));
    }

    #[test]
    fn test_missing_text_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        fs::write(&path, "id,body\n1,x\n").unwrap();

        let err = load_cases(&path, "id", "text").unwrap_err();
        assert!(matches!(err, DataFileError::MissingColumn { column, .. } if column == "text"));
    }
}
