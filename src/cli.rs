use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::orchestrator::{AnalyzeOptions, MergeOptions, StageOptions};

#[derive(Parser, Debug)]
#[command(
    name = "case-tagger",
    version,
    about = "可恢复的、基于分类体系的 LLM 批量案例打标工具"
)]
pub struct Cli {
    /// TOML 配置文件（环境变量优先级更高）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行或恢复一个分类阶段
    Classify(ClassifyArgs),
    /// 把结果表中的新标签并入分类体系
    Merge(MergeArgs),
    /// 统计多张结果表并集上的标签分布
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// 阶段ID（检查点与输出文件名的一部分）
    #[arg(long)]
    pub stage: String,

    /// 案例数据集（CSV）
    #[arg(long)]
    pub dataset: PathBuf,

    /// 之前阶段的结果表，其中的案例不再处理（可重复）
    #[arg(long)]
    pub exclude: Vec<PathBuf>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// 本次运行最多处理的批次数
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// 结果表文件名（位于 output_dir 下）
    #[arg(long)]
    pub output: Option<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// 阶段已完成时仍重新分类，并覆盖已有结果表
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// 复核后的结果表
    #[arg(long)]
    pub results: PathBuf,

    /// 分类体系文档，默认取配置中的 schema_path
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// 允许新建为顶层类别的列（可重复）
    #[arg(long = "new-category")]
    pub new_categories: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// 结果表（至少一张，后出现的表在重复案例上优先）
    #[arg(required = true)]
    pub tables: Vec<PathBuf>,

    /// 要统计的类别（可重复），默认取分类体系中的全部类别
    #[arg(long = "category")]
    pub categories: Vec<String>,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl From<ClassifyArgs> for StageOptions {
    fn from(args: ClassifyArgs) -> Self {
        StageOptions {
            stage_id: args.stage,
            dataset: args.dataset,
            exclude: args.exclude,
            limit: args.limit,
            max_batches: args.max_batches,
            dry_run: args.dry_run,
            force: args.force,
            output_name: args.output,
        }
    }
}

impl From<MergeArgs> for MergeOptions {
    fn from(args: MergeArgs) -> Self {
        MergeOptions {
            results: args.results,
            schema: args.schema,
            extra_categories: args.new_categories,
        }
    }
}

impl From<AnalyzeArgs> for AnalyzeOptions {
    fn from(args: AnalyzeArgs) -> Self {
        AnalyzeOptions {
            tables: args.tables,
            categories: args.categories,
            output: args.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "case-tagger",
            "--config",
            "tagger.toml",
            "classify",
            "--stage",
            "iter2",
            "--dataset",
            "cases.csv",
            "--exclude",
            "classified_iter1.csv",
            "--max-batches",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("tagger.toml")));
        let Commands::Classify(args) = cli.command else {
            panic!("expected classify");
        };
        let options = StageOptions::from(args);
        assert_eq!(options.stage_id, "iter2");
        assert_eq!(options.exclude, vec![PathBuf::from("classified_iter1.csv")]);
        assert_eq!(options.max_batches, Some(3));
        assert!(!options.dry_run);
        assert!(!options.force);
    }

    #[test]
    fn test_classify_force_flag() {
        let cli = Cli::try_parse_from([
            "case-tagger", "classify", "--stage", "s1", "--dataset", "cases.csv", "--force",
        ])
        .unwrap();
        let Commands::Classify(args) = cli.command else {
            panic!("expected classify");
        };
        assert!(StageOptions::from(args).force);
    }

    #[test]
    fn test_analyze_requires_a_table() {
        assert!(Cli::try_parse_from(["case-tagger", "analyze"]).is_err());
    }
}
