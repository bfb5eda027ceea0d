use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

/// 程序配置文件
///
/// 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量覆盖。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,

    // --- 批处理 ---
    /// 每批案例数（每批结束后写一次检查点）
    pub batch_size: usize,
    /// 批内最大并发调用数（不超过 batch_size）
    pub max_concurrent_calls: usize,
    /// 全进程共享的最小调用间隔（毫秒）
    pub min_call_interval_ms: u64,
    /// 单次调用超时（秒）
    pub call_timeout_secs: u64,
    /// 网络/限流/超时错误的最大重试次数
    pub max_retries: u32,
    /// 回复解析失败的最大重试次数
    pub parse_retries: u32,
    /// 重试退避基数（毫秒），按 2 的幂增长
    pub retry_backoff_ms: u64,
    /// 恢复运行时是否重新尝试已终止失败的案例
    pub retry_failed_on_resume: bool,

    // --- 数据列 ---
    pub id_column: String,
    pub text_column: String,

    // --- 文件路径 ---
    pub schema_path: PathBuf,
    pub instructions_path: Option<PathBuf>,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,

    // --- 分类体系合并 ---
    /// 新标签追加到的兜底子类
    pub fallback_bucket: String,

    // --- 费用估算 ---
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub est_input_tokens_per_case: u64,
    pub est_output_tokens_per_case: u64,

    /// 日志级别（RUST_LOG 优先）
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.1,
            llm_max_tokens: 1000,
            batch_size: 5,
            max_concurrent_calls: 3,
            min_call_interval_ms: 2000,
            call_timeout_secs: 120,
            max_retries: 3,
            parse_retries: 1,
            retry_backoff_ms: 1000,
            retry_failed_on_resume: false,
            id_column: "id".to_string(),
            text_column: "text".to_string(),
            schema_path: PathBuf::from("schema.json"),
            instructions_path: None,
            checkpoint_dir: PathBuf::from(".checkpoints"),
            output_dir: PathBuf::from("output"),
            fallback_bucket: "other".to_string(),
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
            est_input_tokens_per_case: 1000,
            est_output_tokens_per_case: 200,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：可选的 TOML 文件 + 环境变量覆盖，最后校验
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let mut config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取，未出现的字段取默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 仅使用默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            batch_size: std::env::var("BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_size),
            max_concurrent_calls: std::env::var("MAX_CONCURRENT_CALLS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_calls),
            min_call_interval_ms: std::env::var("MIN_CALL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.min_call_interval_ms),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(default.log_level),
            ..default
        }
    }

    /// 校验取值范围；并发数超过批大小时收敛到批大小
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "必须大于 0"));
        }
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid("max_concurrent_calls", "必须大于 0"));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::invalid("call_timeout_secs", "必须大于 0"));
        }
        if self.id_column.trim().is_empty() || self.text_column.trim().is_empty() {
            return Err(ConfigError::invalid("id_column/text_column", "列名不能为空"));
        }
        if self.id_column == self.text_column {
            return Err(ConfigError::invalid("id_column/text_column", "两列不能相同"));
        }
        if self.fallback_bucket.trim().is_empty() {
            return Err(ConfigError::invalid("fallback_bucket", "不能为空"));
        }
        if self.max_concurrent_calls > self.batch_size {
            warn!(
                "⚠️ max_concurrent_calls ({}) 大于 batch_size ({})，已收敛为 {}",
                self.max_concurrent_calls, self.batch_size, self.batch_size
            );
            self.max_concurrent_calls = self.batch_size;
        }
        Ok(())
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            batch_size = 10
            id_column = "Case"
            text_column = "Gist"
            instructions_path = "rules.txt"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.id_column, "Case");
        assert_eq!(config.instructions_path, Some(PathBuf::from("rules.txt")));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.fallback_bucket, "other");
    }

    #[test]
    fn test_validate_clamps_pool_to_batch_size() {
        let mut config = Config {
            batch_size: 2,
            max_concurrent_calls: 8,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.max_concurrent_calls, 2);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "batch_size"
        ));
    }

    #[test]
    fn test_unknown_toml_type_is_error() {
        assert!(Config::from_toml_str("batch_size = \"many\"").is_err());
    }
}
