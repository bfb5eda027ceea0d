//! 案例处理上下文
//!
//! 封装"我正在处理哪个批次里的哪个案例"这一信息

use std::fmt::Display;

/// 案例处理上下文（仅用于日志显示）
#[derive(Debug, Clone)]
pub struct CaseCtx {
    /// 案例ID
    pub case_id: String,

    /// 所属批次（从 0 开始，跨恢复连续编号）
    pub batch_index: usize,

    /// 第几次尝试（从 1 开始）
    pub attempt: u32,
}

impl CaseCtx {
    pub fn new(case_id: impl Into<String>, batch_index: usize, attempt: u32) -> Self {
        Self {
            case_id: case_id.into(),
            batch_index,
            attempt,
        }
    }
}

impl Display for CaseCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.attempt > 1 {
            write!(f, "[案例 {} 第{}次尝试]", self.case_id, self.attempt)
        } else {
            write!(f, "[案例 {}]", self.case_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CaseCtx::new("42", 0, 1).to_string(), "[案例 42]");
        assert_eq!(CaseCtx::new("42", 3, 2).to_string(), "[案例 42 第2次尝试]");
    }
}
