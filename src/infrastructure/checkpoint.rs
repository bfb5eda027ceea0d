//! 检查点管理器 - 基础设施层
//!
//! ## 职责
//!
//! 持有一个阶段（stage）的持久化进度：已处理的案例ID集合、尚未落入最终结果表的终态结果、
//! 最后一次提交的批次号。
//!
//! ## 约定
//!
//! - 每批结束后提交一次，写入采用"临时文件 + rename"，中断时不会留下半截状态
//! - 提交互斥：同一时刻只有一个写者
//! - 文件无法解析或内容自相矛盾 → `CheckpointError::Corruption`，恢复流程直接中止
//! - 阶段完成且最终结果表落盘后才删除（`finalize`）

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CheckpointError;
use crate::infrastructure::atomic_file::write_atomically;
use crate::models::CaseOutcome;

/// 单个阶段的持久化进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub stage_id: String,
    /// 已到达终态的案例ID
    pub processed_ids: BTreeSet<String>,
    /// 终态结果（按提交顺序），阶段完成时写入结果表
    pub outcomes: Vec<CaseOutcome>,
    pub last_committed_batch: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new(stage_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            stage_id: stage_id.into(),
            processed_ids: BTreeSet::new(),
            outcomes: Vec::new(),
            last_committed_batch: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_processed(&self, case_id: &str) -> bool {
        self.processed_ids.contains(case_id)
    }

    /// 下一个批次号（跨恢复连续编号）
    pub fn next_batch_index(&self) -> usize {
        self.last_committed_batch.map_or(0, |last| last + 1)
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }

    /// 移除终止失败的结果，使其在本次运行中被重新尝试；成功结果永不移除
    pub fn drop_failed(&mut self) -> usize {
        let before = self.outcomes.len();
        let processed_ids = &mut self.processed_ids;
        self.outcomes.retain(|outcome| {
            let keep = outcome.is_success();
            if !keep {
                processed_ids.remove(outcome.case_id());
            }
            keep
        });
        before - self.outcomes.len()
    }

    /// 自洽性检查：ID 唯一、processed_ids 与结果一一对应
    fn check_consistency(&self, expected_stage: &str) -> Result<(), String> {
        if self.stage_id != expected_stage {
            return Err(format!(
                "文件中的阶段ID为 '{}'，期望 '{}'",
                self.stage_id, expected_stage
            ));
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(self.outcomes.len());
        for outcome in &self.outcomes {
            if !seen.insert(outcome.case_id()) {
                return Err(format!("案例 {} 出现了多个终态结果", outcome.case_id()));
            }
        }

        let recorded: HashSet<&str> = self.processed_ids.iter().map(String::as_str).collect();
        if recorded != seen {
            return Err(format!(
                "已处理ID集合（{} 个）与终态结果（{} 个）不一致",
                recorded.len(),
                seen.len()
            ));
        }
        Ok(())
    }
}

/// 检查点管理器
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    commit_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 检查点文件路径：`<dir>/checkpoint_<stage_id>.json`
    pub fn path_for(&self, stage_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_stage_id(stage_id)?;
        Ok(self.dir.join(format!("checkpoint_{}.json", stage_id)))
    }

    /// 读取检查点；不存在时返回 None
    pub fn load(&self, stage_id: &str) -> Result<Option<CheckpointState>, CheckpointError> {
        let path = self.path_for(stage_id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };

        let state: CheckpointState = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::corruption(&path, format!("无法解析: {}", e)))?;
        state
            .check_consistency(stage_id)
            .map_err(|reason| CheckpointError::corruption(&path, reason))?;

        debug!(
            "读取检查点 {}: 已处理 {} 个, 最后批次 {:?}",
            path.display(),
            state.processed_ids.len(),
            state.last_committed_batch
        );
        Ok(Some(state))
    }

    /// 恢复已有检查点，或创建并立即持久化一个新的
    ///
    /// 返回 (状态, 是否为恢复)
    pub fn open(&self, stage_id: &str) -> Result<(CheckpointState, bool), CheckpointError> {
        if let Some(state) = self.load(stage_id)? {
            info!(
                "♻️ 发现阶段 {} 的检查点: 已完成 {} 个案例 (成功 {}, 失败 {})",
                stage_id,
                state.processed_ids.len(),
                state.succeeded_count(),
                state.failed_count()
            );
            return Ok((state, true));
        }

        let state = CheckpointState::new(stage_id);
        self.persist(&state)?;
        info!("📝 为阶段 {} 创建新的检查点", stage_id);
        Ok((state, false))
    }

    /// 提交一个批次的终态结果
    ///
    /// 先写盘，成功后才替换内存中的状态。已有终态的案例不允许再次提交。
    pub fn commit(
        &self,
        state: &mut CheckpointState,
        batch_index: usize,
        outcomes: Vec<CaseOutcome>,
    ) -> Result<(), CheckpointError> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut next = state.clone();
        for outcome in outcomes {
            if !next.processed_ids.insert(outcome.case_id().to_string()) {
                let path = self.path_for(&state.stage_id)?;
                return Err(CheckpointError::corruption(
                    &path,
                    format!("案例 {} 已有终态结果，拒绝重复提交", outcome.case_id()),
                ));
            }
            next.outcomes.push(outcome);
        }
        next.last_committed_batch = Some(batch_index);
        next.updated_at = Utc::now();

        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    /// 阶段完成后删除检查点；文件不存在视为成功
    pub fn finalize(&self, stage_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(stage_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("🧹 已删除检查点: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&path, e)),
        }
    }

    fn persist(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let path = self.path_for(&state.stage_id)?;
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CheckpointError::io(&path, std::io::Error::other(e)))?;
        write_atomically(&path, &bytes).map_err(|e| CheckpointError::io(&path, e))
    }
}

/// 阶段ID 作为文件名的一部分，只允许 `[A-Za-z0-9_-]`
pub fn validate_stage_id(stage_id: &str) -> Result<(), CheckpointError> {
    let valid = !stage_id.is_empty()
        && stage_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidStageId(stage_id.to_string()))
    }
}
