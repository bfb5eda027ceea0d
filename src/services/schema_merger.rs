//! 分类体系合并服务 - 业务能力层
//!
//! 把结果表中人工复核后出现的新标签并入分类体系。
//!
//! ## 职责
//! - `plan`：只读地比较结果表与当前体系，得出合并计划
//! - `apply`：按计划生成新的体系（旧体系保持不变）
//!
//! 匹配是精确、区分大小写的字符串比较；对同一张表再次合并得到空计划。

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::SchemaFileError;
use crate::models::{Category, ResultTable, Schema, Subcategory};

/// 某个已有类别的新增标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryAdditions {
    pub category: String,
    /// 按在结果表中首次出现的顺序
    pub new_tags: Vec<String>,
    /// 兜底子类原本不存在、需要新建
    pub bucket_created: bool,
}

/// 新建的顶层类别（只含兜底子类，需人工整理）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCategory {
    pub category: String,
    pub tags: Vec<String>,
}

/// 无法加入的标签：它已经属于另一个类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagConflict {
    pub tag: String,
    /// 结果表中出现该标签的列
    pub observed_in: String,
    /// 体系中已有该标签的位置（类别/子类）
    pub existing_location: String,
}

/// 合并计划
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergePlan {
    pub additions: Vec<CategoryAdditions>,
    pub new_categories: Vec<NewCategory>,
    pub conflicts: Vec<TagConflict>,
    /// 体系中有、结果表中没有对应列的类别
    pub missing_columns: Vec<String>,
    pub rows_considered: usize,
    pub rows_skipped_failed: usize,
}

impl MergePlan {
    /// 是否没有任何需要写入的变更（冲突只报告，不写入）
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.new_categories.is_empty()
    }

    pub fn added_tag_count(&self) -> usize {
        self.additions.iter().map(|a| a.new_tags.len()).sum::<usize>()
            + self.new_categories.iter().map(|c| c.tags.len()).sum::<usize>()
    }
}

/// 分类体系合并器
#[derive(Debug, Clone)]
pub struct SchemaMerger {
    fallback_bucket: String,
}

impl SchemaMerger {
    pub fn new(fallback_bucket: impl Into<String>) -> Self {
        Self {
            fallback_bucket: fallback_bucket.into(),
        }
    }

    pub fn fallback_bucket(&self) -> &str {
        &self.fallback_bucket
    }

    /// 计算合并计划
    ///
    /// `extra_categories` 是明确指定的、体系中尚不存在的列名；只有它们会成为新的顶层类别。
    pub fn plan(
        &self,
        schema: &Schema,
        table: &ResultTable,
        extra_categories: &[String],
    ) -> MergePlan {
        let mut plan = MergePlan::default();
        let rows: Vec<_> = table.rows().filter(|row| !row.is_failed()).collect();
        plan.rows_considered = rows.len();
        plan.rows_skipped_failed = table.len() - rows.len();

        // 本次计划中已经分配过的新标签，保证全局唯一
        let mut planned: HashSet<String> = HashSet::new();

        let mut columns: Vec<(&str, bool)> = schema.category_names().map(|c| (c, false)).collect();
        for extra in extra_categories {
            if schema.category(extra).is_none() && !columns.iter().any(|(c, _)| c == extra) {
                columns.push((extra.as_str(), true));
            }
        }

        for (category, is_new) in columns {
            if !table.has_column(category) {
                warn!("⚠️ 结果表中没有类别列 {}，跳过", category);
                plan.missing_columns.push(category.to_string());
                continue;
            }

            let mut new_tags: Vec<String> = Vec::new();
            for row in &rows {
                for tag in row.tags(category) {
                    if schema.contains_tag(category, &tag) || new_tags.contains(&tag) {
                        continue;
                    }
                    if tag.contains(',') {
                        warn!("⚠️ 标签 {:?} 含有逗号，无法加入分类体系", tag);
                        continue;
                    }
                    if let Some((other_category, other_sub)) = schema.locate(&tag) {
                        push_conflict(
                            &mut plan.conflicts,
                            &tag,
                            category,
                            format!("{}/{}", other_category, other_sub),
                        );
                        continue;
                    }
                    if planned.contains(&tag) {
                        push_conflict(
                            &mut plan.conflicts,
                            &tag,
                            category,
                            "本次合并的另一个类别".to_string(),
                        );
                        continue;
                    }
                    new_tags.push(tag);
                }
            }

            planned.extend(new_tags.iter().cloned());
            debug!("类别 {}: 发现 {} 个新标签", category, new_tags.len());

            if is_new {
                plan.new_categories.push(NewCategory {
                    category: category.to_string(),
                    tags: new_tags,
                });
            } else if !new_tags.is_empty() {
                let bucket_created = schema
                    .category(category)
                    .and_then(|c| c.subcategory(&self.fallback_bucket))
                    .is_none();
                plan.additions.push(CategoryAdditions {
                    category: category.to_string(),
                    new_tags,
                    bucket_created,
                });
            }
        }

        plan
    }

    /// 按计划生成新的分类体系
    pub fn apply(&self, schema: &Schema, plan: &MergePlan) -> Result<Schema, SchemaFileError> {
        let mut categories: Vec<Category> = schema.categories().to_vec();

        for addition in &plan.additions {
            let category = categories
                .iter_mut()
                .find(|c| c.name == addition.category)
                .ok_or_else(|| {
                    SchemaFileError::invalid(format!("类别 {} 不存在", addition.category))
                })?;
            let bucket = match category
                .subcategories
                .iter()
                .position(|s| s.name == self.fallback_bucket)
            {
                Some(idx) => &mut category.subcategories[idx],
                None => {
                    category.subcategories.push(Subcategory {
                        name: self.fallback_bucket.clone(),
                        tags: Vec::new(),
                    });
                    let last = category.subcategories.len() - 1;
                    &mut category.subcategories[last]
                }
            };
            bucket.tags.extend(addition.new_tags.iter().cloned());
        }

        for new_category in &plan.new_categories {
            categories.push(Category {
                name: new_category.category.clone(),
                subcategories: vec![Subcategory {
                    name: self.fallback_bucket.clone(),
                    tags: new_category.tags.clone(),
                }],
            });
        }

        Schema::new(categories)
    }
}

fn push_conflict(conflicts: &mut Vec<TagConflict>, tag: &str, observed_in: &str, location: String) {
    if conflicts
        .iter()
        .any(|c| c.tag == tag && c.observed_in == observed_in)
    {
        return;
    }
    warn!(
        "⚠️ 标签 {} 出现在列 {}，但已属于 {}，未加入",
        tag, observed_in, location
    );
    conflicts.push(TagConflict {
        tag: tag.to_string(),
        observed_in: observed_in.to_string(),
        existing_location: location,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SchemaDocument;
    use std::fs;
    use std::path::Path;

    fn schema(json: &str) -> Schema {
        SchemaDocument::parse(json).unwrap().unwrap().schema
    }

    fn table(dir: &Path, content: &str) -> ResultTable {
        let path = dir.join("classified.csv");
        fs::write(&path, content).unwrap();
        ResultTable::load(&path, "id").unwrap()
    }

    #[test]
    fn test_new_tags_go_to_fallback_bucket_in_first_seen_order() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema(r#"{"crime_type": {"financial_fraud": ["investment_scam"]}}"#);
        let table = table(
            dir.path(),
            "id,crime_type,status\n\
             1,\"loan_app_fraud, investment_scam\",succeeded\n\
             2,\"crypto_scam, loan_app_fraud\",succeeded\n\
             3,ignored_because_failed,failed\n",
        );

        let merger = SchemaMerger::new("other");
        let plan = merger.plan(&schema, &table, &[]);
        assert_eq!(plan.rows_skipped_failed, 1);
        assert_eq!(
            plan.additions,
            vec![CategoryAdditions {
                category: "crime_type".to_string(),
                new_tags: vec!["loan_app_fraud".to_string(), "crypto_scam".to_string()],
                bucket_created: true,
            }]
        );

        let merged = merger.apply(&schema, &plan).unwrap();
        let category = merged.category("crime_type").unwrap();
        assert_eq!(category.subcategories.len(), 2);
        assert_eq!(category.subcategories[1].name, "other");
        assert_eq!(
            category.subcategories[1].tags,
            vec!["loan_app_fraud", "crypto_scam"]
        );

        // 第二次合并没有任何变化
        let again = merger.plan(&merged, &table, &[]);
        assert!(again.is_empty());
    }

    #[test]
    fn test_existing_fallback_bucket_is_extended() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema(r#"{"crime_type": {"other": ["misc"], "fraud": ["job_fraud"]}}"#);
        let table = table(dir.path(), "id,crime_type\n1,new_one\n");

        let merger = SchemaMerger::new("other");
        let plan = merger.plan(&schema, &table, &[]);
        assert!(!plan.additions[0].bucket_created);
        let merged = merger.apply(&schema, &plan).unwrap();
        let category = merged.category("crime_type").unwrap();
        assert_eq!(category.subcategories[0].tags, vec!["misc", "new_one"]);
    }

    #[test]
    fn test_tag_owned_by_other_category_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema(
            r#"{"crime_type": {"fraud": ["job_fraud"]}, "platform": {"apps": ["whatsapp"]}}"#,
        );
        let table = table(dir.path(), "id,crime_type,platform\n1,whatsapp,\n");

        let plan = SchemaMerger::new("other").plan(&schema, &table, &[]);
        assert!(plan.is_empty());
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].existing_location, "platform/apps");
    }

    #[test]
    fn test_missing_columns_and_explicit_new_category() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema(r#"{"crime_type": {"fraud": ["job_fraud"]}, "platform": {"apps": []}}"#);
        let table = table(dir.path(), "id,crime_type,modus\n1,job_fraud,sim_swap\n");

        let merger = SchemaMerger::new("other");
        let plan = merger.plan(&schema, &table, &[]);
        assert_eq!(plan.missing_columns, vec!["platform"]);
        assert!(plan.is_empty());

        let plan = merger.plan(&schema, &table, &["modus".to_string()]);
        assert_eq!(
            plan.new_categories,
            vec![NewCategory {
                category: "modus".to_string(),
                tags: vec!["sim_swap".to_string()],
            }]
        );
        let merged = merger.apply(&schema, &plan).unwrap();
        assert_eq!(
            merged.category_names().collect::<Vec<_>>(),
            vec!["crime_type", "platform", "modus"]
        );
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema(r#"{"crime_type": {"fraud": ["job_fraud"]}}"#);
        let table = table(dir.path(), "id,crime_type\n1,Job_Fraud\n");

        let plan = SchemaMerger::new("other").plan(&schema, &table, &[]);
        assert_eq!(plan.additions[0].new_tags, vec!["Job_Fraud"]);
    }
}
