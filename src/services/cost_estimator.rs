//! 费用估算服务 - 业务能力层
//!
//! 按每个案例的预估 token 数和单价估算一个阶段的花费，阶段开始前和试运行时输出。

use serde::Serialize;

use crate::config::Config;

/// 费用估算结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub cases: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CostEstimator {
    input_tokens_per_case: u64,
    output_tokens_per_case: u64,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
}

impl CostEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            input_tokens_per_case: config.est_input_tokens_per_case,
            output_tokens_per_case: config.est_output_tokens_per_case,
            input_cost_per_1k: config.input_cost_per_1k,
            output_cost_per_1k: config.output_cost_per_1k,
        }
    }

    pub fn estimate(&self, cases: usize) -> CostEstimate {
        let input_tokens = self.input_tokens_per_case * cases as u64;
        let output_tokens = self.output_tokens_per_case * cases as u64;
        let cost = input_tokens as f64 / 1000.0 * self.input_cost_per_1k
            + output_tokens as f64 / 1000.0 * self.output_cost_per_1k;

        CostEstimate {
            cases,
            input_tokens,
            output_tokens,
            estimated_cost_usd: (cost * 100.0).round() / 100.0,
        }
    }
}
