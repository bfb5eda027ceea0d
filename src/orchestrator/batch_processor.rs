//! 分类阶段处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是"运行/恢复一个分类阶段"的入口，负责批量案例的调度和进度持久化。
//!
//! ## 核心功能
//!
//! 1. **阶段初始化**：加载分类体系快照、自定义规则、案例数据集和检查点
//! 2. **案例选择**：数据集 − 排除表中的案例，截断到 `limit`，顺序确定
//! 3. **并发控制**：使用 Semaphore 限制同时在途的调用数
//! 4. **分批处理**：每批所有案例到达终态后一次性提交检查点，再开始下一批
//! 5. **收尾**：写结果表和报告，最后删除检查点
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个案例的细节，委托 `CaseFlow`
//! - **资源所有者**：唯一持有检查点管理器与全局节流器的模块
//! - **至多一次**：检查点中已有终态的案例不会再调用预言机

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::Oracle;
use crate::config::Config;
use crate::error::{AppResult, CheckpointError, ConfigError};
use crate::infrastructure::{CheckpointManager, CheckpointState, RateLimiter};
use crate::models::loaders::{load_cases, load_instructions, load_schema, log_schema_summary};
use crate::models::{Case, CaseOutcome, ErrorKind, FailedCase, ResultTable, Schema, SchemaViolation};
use crate::services::{
    CostEstimate, CostEstimator, PromptBuilder, ResponseValidator, ResultWriter, TableColumns,
};
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_cases_selected, log_stage_start, print_final_stats,
};
use crate::workflow::{AttemptResult, CaseCtx, CaseFlow, CaseTracker, RetryPolicy};

/// 一次阶段运行的参数
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    pub stage_id: String,
    pub dataset: PathBuf,
    /// 之前阶段的结果表，其中出现过的案例不再选入本阶段
    pub exclude: Vec<PathBuf>,
    pub limit: Option<usize>,
    /// 本次调用最多处理的批次数（花费上限）
    pub max_batches: Option<usize>,
    pub dry_run: bool,
    /// 阶段已完成时仍重新分类并覆盖结果表
    pub force: bool,
    /// 结果表文件名，默认 `classified_<stage_id>.csv`
    pub output_name: Option<String>,
}

impl StageOptions {
    pub fn new(stage_id: impl Into<String>, dataset: impl Into<PathBuf>) -> Self {
        Self {
            stage_id: stage_id.into(),
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    fn table_name(&self) -> String {
        self.output_name
            .clone()
            .unwrap_or_else(|| format!("classified_{}.csv", self.stage_id))
    }

    fn report_name(&self) -> String {
        format!("report_{}.json", self.stage_id)
    }
}

/// 阶段报告（完成时写入 `report_<stage_id>.json`）
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage_id: String,
    pub completed: bool,
    pub dry_run: bool,
    pub resumed: bool,
    pub selected: usize,
    /// 本次运行开始时检查点中已有终态的案例数
    pub already_processed: usize,
    pub processed_this_run: usize,
    pub batches_this_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_by_kind: BTreeMap<String, usize>,
    pub dropped_tags: usize,
    pub estimated_cost: CostEstimate,
    pub table_path: Option<PathBuf>,
    pub failures: Vec<FailedCase>,
    pub violations: Vec<SchemaViolation>,
}

/// 分类阶段运行器
pub struct StageRunner {
    config: Config,
    oracle: Arc<dyn Oracle>,
    checkpoints: CheckpointManager,
    limiter: Arc<RateLimiter>,
}

impl StageRunner {
    /// 创建运行器；预言机由调用方注入（生产环境为 `LlmClient`）
    pub fn new(mut config: Config, oracle: Arc<dyn Oracle>) -> Result<Self, ConfigError> {
        config.validate()?;
        let checkpoints = CheckpointManager::new(config.checkpoint_dir.clone());
        let limiter = Arc::new(RateLimiter::new(config.min_call_interval()));
        Ok(Self {
            config,
            oracle,
            checkpoints,
            limiter,
        })
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// 运行或恢复一个阶段
    pub async fn run(&self, options: &StageOptions) -> Result<StageReport> {
        // 阶段ID 先于任何 I/O 校验
        let checkpoint_path = self.checkpoints.path_for(&options.stage_id)?;
        self.guard_completed_stage(options, &checkpoint_path)?;

        log_stage_start(
            &options.stage_id,
            self.config.batch_size,
            self.config.max_concurrent_calls,
        );

        // 分类体系问题是致命错误，必须在任何调用之前暴露
        let document = load_schema(&self.config.schema_path)?;
        let schema = Arc::new(document.schema);
        log_schema_summary(&schema);

        let rules = load_instructions(self.config.instructions_path.as_deref())
            .context("读取自定义分类规则失败")?;

        let dataset = load_cases(
            &options.dataset,
            &self.config.id_column,
            &self.config.text_column,
        )?;
        let selection = self.select_cases(dataset.cases, options)?;
        let selected_ids: HashSet<&str> = selection.iter().map(|c| c.id.as_str()).collect();

        let (mut state, resumed) = if options.dry_run {
            match self.checkpoints.load(&options.stage_id)? {
                Some(state) => (state, true),
                None => (CheckpointState::new(&options.stage_id), false),
            }
        } else {
            self.checkpoints.open(&options.stage_id)?
        };

        if resumed && self.config.retry_failed_on_resume {
            let dropped = state.drop_failed();
            if dropped > 0 {
                info!("🔁 将重新尝试检查点中 {} 个终态失败的案例", dropped);
            }
        }

        let stray: Vec<&str> = state
            .processed_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !selected_ids.contains(id))
            .collect();
        if !stray.is_empty() {
            warn!(
                "⚠️ 检查点中有 {} 个案例不在本次选择范围内，不会写入结果表: {:?}",
                stray.len(),
                stray.iter().take(10).collect::<Vec<_>>()
            );
        }

        let pending: Vec<Case> = selection
            .iter()
            .filter(|case| !state.is_processed(&case.id))
            .cloned()
            .collect();
        let already_processed = selection.len() - pending.len();
        log_cases_selected(selection.len(), already_processed, pending.len());

        let estimate = CostEstimator::new(&self.config).estimate(pending.len());
        info!(
            "💰 预计花费: ${:.2} ({} 个案例, 输入约 {} tokens, 输出约 {} tokens)",
            estimate.estimated_cost_usd, estimate.cases, estimate.input_tokens, estimate.output_tokens
        );

        let mut report = StageReport {
            stage_id: options.stage_id.clone(),
            completed: false,
            dry_run: options.dry_run,
            resumed,
            selected: selection.len(),
            already_processed,
            processed_this_run: 0,
            batches_this_run: 0,
            succeeded: 0,
            failed: 0,
            failed_by_kind: BTreeMap::new(),
            dropped_tags: 0,
            estimated_cost: estimate,
            table_path: None,
            failures: Vec::new(),
            violations: Vec::new(),
        };

        if options.dry_run {
            info!("🧪 试运行：不调用预言机，不写任何文件");
            summarize(&mut report, &state, &selected_ids);
            return Ok(report);
        }

        let flow = Arc::new(CaseFlow::new(
            self.oracle.clone(),
            PromptBuilder::new(schema.clone(), rules),
            ResponseValidator::new(schema.clone()),
            self.limiter.clone(),
            self.config.call_timeout(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_calls));
        let policy = RetryPolicy::from_config(&self.config);

        let mut offset = 0usize;
        for batch in pending.chunks(self.config.batch_size) {
            if let Some(max) = options.max_batches {
                if report.batches_this_run >= max {
                    info!("⏸️ 已达到本次运行的批次上限 ({})，停止", max);
                    break;
                }
            }

            let batch_index = state.next_batch_index();
            log_batch_start(
                batch_index + 1,
                offset + 1,
                offset + batch.len(),
                pending.len(),
            );

            let outcomes = self
                .process_batch(batch, batch_index, &flow, &semaphore, policy)
                .await?;
            let success = outcomes.iter().filter(|o| o.is_success()).count();

            self.checkpoints
                .commit(&mut state, batch_index, outcomes)
                .with_context(|| format!("第 {} 批提交检查点失败", batch_index + 1))?;
            log_batch_complete(batch_index + 1, success, batch.len());

            offset += batch.len();
            report.batches_this_run += 1;
            report.processed_this_run += batch.len();
        }

        report.completed = selection.iter().all(|case| state.is_processed(&case.id));
        summarize(&mut report, &state, &selected_ids);

        if report.completed {
            let table_path = self.write_outputs(
                options,
                &selection,
                &dataset.metadata_columns,
                &state,
                &schema,
                &mut report,
            )?;
            self.checkpoints.finalize(&options.stage_id)?;
            let shown = table_path.display().to_string();
            print_final_stats(
                report.succeeded,
                report.failed,
                report.selected,
                Some(shown.as_str()),
            );
        } else {
            print_final_stats(report.succeeded, report.failed, report.selected, None);
        }

        Ok(report)
    }

    /// 没有检查点但结果表已存在：阶段已经完成，除非 `force` 否则拒绝运行
    fn guard_completed_stage(&self, options: &StageOptions, checkpoint_path: &Path) -> AppResult<()> {
        let table = self.config.output_dir.join(options.table_name());
        let in_progress = checkpoint_path
            .try_exists()
            .map_err(|e| CheckpointError::io(checkpoint_path, e))?;
        let finished = table
            .try_exists()
            .map_err(|e| CheckpointError::io(&table, e))?;
        if in_progress || !finished {
            return Ok(());
        }
        if options.force {
            warn!("⚠️ 阶段 {} 已完成，--force 将重新分类并覆盖 {}", options.stage_id, table.display());
            return Ok(());
        }
        Err(CheckpointError::StageAlreadyCompleted {
            stage_id: options.stage_id.clone(),
            table,
        }
        .into())
    }

    /// 数据集 − 排除表，再截断到 limit；保持数据集顺序
    fn select_cases(&self, cases: Vec<Case>, options: &StageOptions) -> AppResult<Vec<Case>> {
        let mut excluded: HashSet<String> = HashSet::new();
        for path in &options.exclude {
            let table = ResultTable::load(path, &self.config.id_column)?;
            let before = excluded.len();
            excluded.extend(
                table
                    .rows()
                    .map(|row| row.case_id().to_string())
                    .filter(|id| !id.is_empty()),
            );
            info!(
                "🚫 排除表 {}: {} 个案例",
                path.display(),
                excluded.len() - before
            );
        }

        let mut selection: Vec<Case> = cases
            .into_iter()
            .filter(|case| !excluded.contains(&case.id))
            .collect();
        if let Some(limit) = options.limit {
            selection.truncate(limit);
        }
        Ok(selection)
    }

    /// 处理单个批次：直到批内所有案例到达终态
    async fn process_batch(
        &self,
        batch: &[Case],
        batch_index: usize,
        flow: &Arc<CaseFlow>,
        semaphore: &Arc<Semaphore>,
        policy: RetryPolicy,
    ) -> Result<Vec<CaseOutcome>> {
        let cases: HashMap<&str, &Case> = batch.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut tracker = CaseTracker::new(batch.iter().map(|c| c.id.clone()), policy);

        loop {
            let runnable = tracker.runnable();
            if runnable.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(runnable.len());
            for case_id in runnable {
                let Some(case) = cases.get(case_id.as_str()) else {
                    continue;
                };
                let (attempt, delay) = tracker.start(&case_id)?;
                let ctx = CaseCtx::new(case_id.clone(), batch_index, attempt);
                let semaphore = semaphore.clone();
                let flow = flow.clone();
                let case = (*case).clone();

                // 名额在退避结束后才领取
                let handle = tokio::spawn(async move {
                    flow.attempt_when_ready(semaphore, &case, &ctx, delay).await
                });
                handles.push((case_id, handle));
            }

            let (ids, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
            let results = join_all(futures).await;

            for (case_id, joined) in ids.into_iter().zip(results) {
                let result = joined.unwrap_or_else(|e| {
                    error!("[案例 {}] 任务执行失败: {}", case_id, e);
                    AttemptResult::failed(ErrorKind::Internal, format!("任务执行失败: {}", e))
                });
                tracker.finish(&case_id, result)?;
            }
        }

        Ok(tracker.into_outcomes()?)
    }

    fn write_outputs(
        &self,
        options: &StageOptions,
        selection: &[Case],
        metadata_columns: &[String],
        state: &CheckpointState,
        schema: &Schema,
        report: &mut StageReport,
    ) -> Result<PathBuf> {
        let writer = ResultWriter::new(&self.config.output_dir);
        let outcomes: HashMap<&str, &CaseOutcome> =
            state.outcomes.iter().map(|o| (o.case_id(), o)).collect();
        let columns = TableColumns {
            id: &self.config.id_column,
            text: &self.config.text_column,
            metadata: metadata_columns,
        };

        let table_path =
            writer.write_table(&options.table_name(), &columns, selection, &outcomes, schema)?;
        report.table_path = Some(table_path.clone());
        let report_path = writer.write_json(&options.report_name(), &*report)?;
        info!("📝 阶段报告: {}", report_path.display());
        Ok(table_path)
    }
}

/// 从检查点统计本次选择范围内的结果
fn summarize(report: &mut StageReport, state: &CheckpointState, selected: &HashSet<&str>) {
    report.succeeded = 0;
    report.failed = 0;
    report.failed_by_kind.clear();
    report.failures.clear();
    report.violations.clear();

    for outcome in &state.outcomes {
        if !selected.contains(outcome.case_id()) {
            continue;
        }
        match outcome {
            CaseOutcome::Succeeded(result) => {
                report.succeeded += 1;
                report.violations.extend(result.violations.iter().cloned());
            }
            CaseOutcome::Failed(failed) => {
                report.failed += 1;
                *report
                    .failed_by_kind
                    .entry(failed.kind.to_string())
                    .or_insert(0) += 1;
                report.failures.push(failed.clone());
            }
        }
    }
    report.dropped_tags = report.violations.len();
}
