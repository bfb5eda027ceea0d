use std::path::{Path, PathBuf};

use thiserror::Error;

/// 应用程序错误类型
///
/// 这里只收录"整轮运行级别"的错误：出现即中止，且必须在任何计费调用之前暴露。
/// 单个案例的失败走 [`OracleError`] / `FailedCase`，不会冒泡到这里。
#[derive(Debug, Error)]
pub enum AppError {
    /// 检查点错误
    #[error("检查点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 分类体系文件错误
    #[error("分类体系文件错误: {0}")]
    Schema(#[from] SchemaFileError),
    /// 数据文件错误（案例数据集 / 结果表）
    #[error("数据文件错误: {0}")]
    Data(#[from] DataFileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 检查点错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 检查点文件损坏或内容自相矛盾，拒绝猜测
    #[error("检查点已损坏 ({}): {reason}", .path.display())]
    Corruption { path: PathBuf, reason: String },
    /// 读写检查点失败
    #[error("检查点读写失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 阶段ID不合法
    #[error("阶段ID不合法: '{0}'（只允许字母、数字、'_' 和 '-'）")]
    InvalidStageId(String),
    /// 阶段已完成（检查点已删除，结果表已存在），拒绝重复分类
    #[error("阶段 {stage_id} 已完成，结果表已存在 ({})；如需重新分类并覆盖该表请使用 --force", .table.display())]
    StageAlreadyCompleted { stage_id: String, table: PathBuf },
}

/// 分类体系文件错误
#[derive(Debug, Error)]
pub enum SchemaFileError {
    /// 读取失败
    #[error("读取分类体系失败 ({}): {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON 解析失败（含结构不符合 类别 → 子类 → 标签列表）
    #[error("解析分类体系失败 ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// 结构合法但违反不变量
    #[error("分类体系不合法: {reason}")]
    Invalid { reason: String },
    /// 同一个标签出现在多个位置
    #[error("标签 '{tag}' 重复出现: {first} 与 {second}")]
    DuplicateTag {
        tag: String,
        first: String,
        second: String,
    },
    /// 写入失败
    #[error("写入分类体系失败 ({}): {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 数据文件错误
#[derive(Debug, Error)]
pub enum DataFileError {
    /// CSV 读写失败
    #[error("CSV 处理失败 ({}): {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// 缺少必需列
    #[error("文件 {} 缺少必需列 '{column}'", .path.display())]
    MissingColumn { path: PathBuf, column: String },
    /// 文件读写失败
    #[error("文件读写失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({}): {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", .path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 字段取值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

/// 预言机（LLM 服务）单次调用失败
///
/// 这是单个案例级别的错误，由工作流转换为 `FailedCase`，从不中止整批。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),
    /// 请求频率限制
    #[error("请求频率限制, 建议等待: {retry_after_secs:?}秒")]
    RateLimited { retry_after_secs: Option<u64> },
    /// 调用超时
    #[error("调用超时 ({secs}秒)")]
    Timeout { secs: u64 },
    /// 服务端明确拒绝（鉴权失败、请求非法等），重试无意义
    #[error("请求被拒绝: {0}")]
    Rejected(String),
}

// ========== 便捷构造函数 ==========

impl CheckpointError {
    /// 创建检查点损坏错误
    pub fn corruption(path: &Path, reason: impl Into<String>) -> Self {
        CheckpointError::Corruption {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// 创建检查点读写错误
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl SchemaFileError {
    /// 创建不变量违反错误
    pub fn invalid(reason: impl Into<String>) -> Self {
        SchemaFileError::Invalid {
            reason: reason.into(),
        }
    }
}

impl DataFileError {
    /// 创建 CSV 错误
    pub fn csv(path: &Path, source: csv::Error) -> Self {
        DataFileError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    /// 创建缺列错误
    pub fn missing_column(path: &Path, column: impl Into<String>) -> Self {
        DataFileError::MissingColumn {
            path: path.to_path_buf(),
            column: column.into(),
        }
    }
}

impl ConfigError {
    /// 创建配置项不合法错误
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_wraps_source_chain() {
        let err: AppError = CheckpointError::corruption(Path::new("cp.json"), "坏了").into();
        assert!(err.to_string().contains("检查点已损坏"));
        assert!(err.to_string().contains("cp.json"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AppError = SchemaFileError::Read {
            path: PathBuf::from("schema.json"),
            source: io,
        }
        .into();
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_oracle_error_display() {
        let err = OracleError::RateLimited {
            retry_after_secs: Some(3),
        };
        assert!(err.to_string().contains("3"));
        assert_eq!(
            OracleError::Timeout { secs: 5 }.to_string(),
            "调用超时 (5秒)"
        );
    }
}
