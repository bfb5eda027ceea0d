//! 标签分布分析服务 - 业务能力层
//!
//! 在多张（可能重叠的）结果表的并集上统计每个类别中各标签出现的案例数。
//! 百分比的分母永远是并集中的案例总数，而不是各表百分比的平均。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::loaders::result_table::STATUS_COLUMN;
use crate::models::ResultTable;

/// 单个标签的统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagStat {
    pub count: usize,
    pub percentage: f64,
}

/// 单个类别的分布（标签按案例数降序，数量相同按标签名）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDistribution {
    pub total_cases: usize,
    pub cases_with_tags: usize,
    pub unique_tags: usize,
    #[serde(serialize_with = "serialize_ordered")]
    pub tag_distribution: Vec<(String, TagStat)>,
}

impl CategoryDistribution {
    pub fn stat(&self, tag: &str) -> Option<&TagStat> {
        self.tag_distribution
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, stat)| stat)
    }
}

/// 单张输入表的概要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub rows_read: usize,
    pub failed_rows_skipped: usize,
    /// 没有状态列的表中，各类别列全为空的行（尚未分类）
    pub unprocessed_rows_skipped: usize,
    /// 去重后由这张表提供的案例数
    pub cases_contributed: usize,
}

/// 分析结果（按类别给定的顺序输出）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagDistribution {
    pub total_cases: usize,
    pub sources: Vec<SourceSummary>,
    #[serde(serialize_with = "serialize_ordered")]
    pub analysis: Vec<(String, CategoryDistribution)>,
}

impl TagDistribution {
    pub fn category(&self, name: &str) -> Option<&CategoryDistribution> {
        self.analysis
            .iter()
            .find(|(category, _)| category == name)
            .map(|(_, dist)| dist)
    }
}

/// 标签分布分析器
#[derive(Debug, Clone)]
pub struct TagAnalyzer {
    categories: Vec<String>,
}

impl TagAnalyzer {
    pub fn new(categories: Vec<String>) -> Self {
        Self { categories }
    }

    /// 在并集上计算分布；同一案例出现在多张表中时以后面的表为准
    pub fn analyze(&self, tables: &[ResultTable]) -> TagDistribution {
        // case_id → (来源序号, 各类别标签)
        let mut union: HashMap<String, (usize, Vec<Vec<String>>)> = HashMap::new();
        let mut sources: Vec<SourceSummary> = Vec::with_capacity(tables.len());

        for (source_idx, table) in tables.iter().enumerate() {
            // 没有状态列时，类别列全空的行视为未分类
            let detect_unprocessed = !table.has_column(STATUS_COLUMN)
                && self.categories.iter().any(|c| table.has_column(c));
            let mut failed = 0usize;
            let mut unprocessed = 0usize;
            for row in table.rows() {
                let case_id = row.case_id();
                if case_id.is_empty() {
                    continue;
                }
                if row.is_failed() {
                    failed += 1;
                    continue;
                }
                let tags: Vec<Vec<String>> = self.categories.iter().map(|c| row.tags(c)).collect();
                if detect_unprocessed && tags.iter().all(Vec::is_empty) {
                    unprocessed += 1;
                    continue;
                }
                union.insert(case_id.to_string(), (source_idx, tags));
            }
            sources.push(SourceSummary {
                path: table.source.clone(),
                rows_read: table.len(),
                failed_rows_skipped: failed,
                unprocessed_rows_skipped: unprocessed,
                cases_contributed: 0,
            });
        }

        for (source_idx, _) in union.values() {
            sources[*source_idx].cases_contributed += 1;
        }

        let total_cases = union.len();
        let analysis = self
            .categories
            .iter()
            .enumerate()
            .map(|(idx, category)| {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                let mut cases_with_tags = 0usize;
                for (_, tags) in union.values() {
                    let case_tags = &tags[idx];
                    if !case_tags.is_empty() {
                        cases_with_tags += 1;
                    }
                    // 每个案例对同一标签只计一次
                    let unique: HashSet<&str> = case_tags.iter().map(String::as_str).collect();
                    for tag in unique {
                        *counts.entry(tag).or_insert(0) += 1;
                    }
                }

                let mut tag_distribution: Vec<(String, TagStat)> = counts
                    .into_iter()
                    .map(|(tag, count)| {
                        (
                            tag.to_string(),
                            TagStat {
                                count,
                                percentage: percentage(count, total_cases),
                            },
                        )
                    })
                    .collect();
                tag_distribution
                    .sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(&b.0)));

                (
                    category.clone(),
                    CategoryDistribution {
                        total_cases,
                        cases_with_tags,
                        unique_tags: tag_distribution.len(),
                        tag_distribution,
                    },
                )
            })
            .collect();

        TagDistribution {
            total_cases,
            sources,
            analysis,
        }
    }
}

/// 百分比，保留两位小数
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10000.0).round() / 100.0
}

fn serialize_ordered<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}
