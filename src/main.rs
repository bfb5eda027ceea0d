use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use case_tagger::cli::{Cli, Commands};
use case_tagger::clients::LlmClient;
use case_tagger::config::Config;
use case_tagger::orchestrator::{run_schema_update, run_tag_analysis, StageRunner};
use case_tagger::utils::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("❌ 运行失败: {}", err);
        for cause in err.chain().skip(1) {
            error!("   原因: {}", cause);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // 加载配置（日志尚未初始化时先按默认级别输出错误）
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };

    // 初始化日志
    logging::init(&config.log_level);

    match cli.command {
        Commands::Classify(args) => {
            let oracle = Arc::new(LlmClient::new(&config));
            let runner = StageRunner::new(config, oracle)?;
            runner.run(&args.into()).await?;
        }
        Commands::Merge(args) => {
            run_schema_update(&config, &args.into())?;
        }
        Commands::Analyze(args) => {
            run_tag_analysis(&config, &args.into())?;
        }
    }

    Ok(())
}
