//! 标签分布报告 - 编排层
//!
//! 读取任意多张结果表，在并集上统计标签分布，写出一个 JSON 文档。

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::info;

use crate::config::Config;
use crate::models::loaders::load_schema;
use crate::models::ResultTable;
use crate::services::result_writer::write_json_to;
use crate::services::{TagAnalyzer, TagDistribution};

pub const DEFAULT_OUTPUT_NAME: &str = "tag_analysis_results.json";

/// 一次分析的参数
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub tables: Vec<PathBuf>,
    /// 为空时使用分类体系中的全部类别
    pub categories: Vec<String>,
    /// 默认 `<output_dir>/tag_analysis_results.json`
    pub output: Option<PathBuf>,
}

/// 分析标签分布并写出结果
pub fn run_tag_analysis(config: &Config, options: &AnalyzeOptions) -> Result<TagDistribution> {
    if options.tables.is_empty() {
        bail!("至少需要一张结果表");
    }

    let categories: Vec<String> = if options.categories.is_empty() {
        load_schema(&config.schema_path)?
            .schema
            .category_names()
            .map(str::to_string)
            .collect()
    } else {
        options.categories.clone()
    };

    let tables = options
        .tables
        .iter()
        .map(|path| ResultTable::load(path, &config.id_column))
        .collect::<Result<Vec<_>, _>>()?;

    let distribution = TagAnalyzer::new(categories).analyze(&tables);
    log_distribution(&distribution);

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir.join(DEFAULT_OUTPUT_NAME));
    write_json_to(&output, &distribution)?;
    info!("📝 分析结果已保存至: {}", output.display());

    Ok(distribution)
}

fn log_distribution(distribution: &TagDistribution) {
    info!("\n{}", "=".repeat(60));
    info!("📊 标签分布 (共 {} 个案例)", distribution.total_cases);
    for source in &distribution.sources {
        info!(
            "  {}: 读取 {} 行, 贡献 {} 个案例 (跳过失败 {}, 未分类 {})",
            source.path.display(),
            source.rows_read,
            source.cases_contributed,
            source.failed_rows_skipped,
            source.unprocessed_rows_skipped
        );
    }
    info!("{}", "=".repeat(60));

    for (category, dist) in &distribution.analysis {
        info!("\n{}:", category.to_uppercase().replace('_', " "));
        info!("  有标签的案例: {}", dist.cases_with_tags);
        info!("  不同标签数: {}", dist.unique_tags);
        for (i, (tag, stat)) in dist.tag_distribution.iter().take(10).enumerate() {
            info!("    {:2}. {}: {} 个案例 ({}%)", i + 1, tag, stat.count, stat.percentage);
        }
    }
}
