//! 分类体系更新 - 编排层
//!
//! ## 职责
//!
//! 把一张（人工复核后的）结果表并入分类体系文档：
//!
//! 1. 加载分类体系（任何问题都是致命错误）和结果表
//! 2. 计算合并计划；没有变更时什么都不写
//! 3. 先把磁盘上的原文件逐字节备份，再原子写入新体系

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::atomic_file::write_atomically;
use crate::models::loaders::{load_schema, save_schema};
use crate::models::{ResultTable, SchemaDocument};
use crate::services::{MergePlan, SchemaMerger};

/// 一次合并的参数
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub results: PathBuf,
    /// 默认使用配置中的 `schema_path`
    pub schema: Option<PathBuf>,
    /// 允许新建为顶层类别的列名
    pub extra_categories: Vec<String>,
}

/// 合并报告
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub schema_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub changed: bool,
    pub plan: MergePlan,
}

/// 把结果表中的新标签并入分类体系
pub fn run_schema_update(config: &Config, options: &MergeOptions) -> Result<MergeReport> {
    let schema_path = options
        .schema
        .clone()
        .unwrap_or_else(|| config.schema_path.clone());

    info!("{}", "=".repeat(60));
    info!("🔄 分类体系更新: {}", schema_path.display());
    info!("📄 结果表: {}", options.results.display());
    info!("{}", "=".repeat(60));

    let document = load_schema(&schema_path)?;
    let table = ResultTable::load(&options.results, &config.id_column)?;

    let merger = SchemaMerger::new(config.fallback_bucket.clone());
    let plan = merger.plan(&document.schema, &table, &options.extra_categories);
    log_plan(&plan, merger.fallback_bucket());

    if plan.is_empty() {
        info!("✓ 没有发现新标签，分类体系保持不变");
        return Ok(MergeReport {
            schema_path,
            backup_path: None,
            changed: false,
            plan,
        });
    }

    let merged = merger
        .apply(&document.schema, &plan)
        .context("生成新的分类体系失败")?;

    let backup_path = backup_schema(&schema_path)?;
    info!("💾 已备份原分类体系: {}", backup_path.display());

    let updated = SchemaDocument {
        schema: merged,
        enveloped: document.enveloped,
    };
    save_schema(&schema_path, &updated)?;
    info!(
        "✅ 分类体系已更新: 新增 {} 个标签, 现共 {} 个标签",
        plan.added_tag_count(),
        updated.schema.tag_count()
    );

    Ok(MergeReport {
        schema_path,
        backup_path: Some(backup_path),
        changed: true,
        plan,
    })
}

/// 原文件逐字节复制到 `<stem>.backup-<UTC 时间戳>.json`，已有同名备份时追加序号
fn backup_schema(schema_path: &Path) -> Result<PathBuf> {
    let bytes = fs::read(schema_path)
        .with_context(|| format!("读取分类体系失败: {}", schema_path.display()))?;
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let path = unused_backup_path(schema_path, &timestamp)?;
    write_atomically(&path, &bytes)
        .with_context(|| format!("写入备份失败: {}", path.display()))?;
    Ok(path)
}

fn unused_backup_path(schema_path: &Path, timestamp: &str) -> Result<PathBuf> {
    let mut seq = 0usize;
    loop {
        let path = backup_path_for(schema_path, timestamp, seq);
        let taken = path
            .try_exists()
            .with_context(|| format!("检查备份文件失败: {}", path.display()))?;
        if !taken {
            return Ok(path);
        }
        seq += 1;
    }
}

fn backup_path_for(schema_path: &Path, timestamp: &str, seq: usize) -> PathBuf {
    let stem = schema_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "schema".to_string());
    let name = if seq == 0 {
        format!("{}.backup-{}.json", stem, timestamp)
    } else {
        format!("{}.backup-{}-{}.json", stem, timestamp, seq)
    };
    schema_path.with_file_name(name)
}

fn log_plan(plan: &MergePlan, bucket: &str) {
    info!(
        "📊 参与合并的行: {} (跳过失败行 {})",
        plan.rows_considered, plan.rows_skipped_failed
    );
    for addition in &plan.additions {
        info!(
            "  {} → {}{}: {:?}",
            addition.category,
            bucket,
            if addition.bucket_created { " (新建)" } else { "" },
            addition.new_tags
        );
    }
    for category in &plan.new_categories {
        warn!(
            "🆕 新建顶层类别 {}（仅含 {} 子类，需人工整理）: {:?}",
            category.category, bucket, category.tags
        );
    }
    if !plan.conflicts.is_empty() {
        warn!("⚠️ {} 个标签因已属于其他类别而未加入", plan.conflicts.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_sits_beside_schema() {
        let path = backup_path_for(Path::new("/data/schema.json"), "20260101T000000.123Z", 0);
        assert_eq!(
            path,
            PathBuf::from("/data/schema.backup-20260101T000000.123Z.json")
        );
    }

    #[test]
    fn test_existing_backup_is_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        let first = unused_backup_path(&schema_path, "20260101T000000.123Z").unwrap();
        fs::write(&first, "original").unwrap();

        let second = unused_backup_path(&schema_path, "20260101T000000.123Z").unwrap();
        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap(),
            "schema.backup-20260101T000000.123Z-1.json"
        );
    }
}
