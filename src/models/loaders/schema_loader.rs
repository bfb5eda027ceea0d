use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::SchemaFileError;
use crate::infrastructure::atomic_file::write_atomically;
use crate::models::schema::{Schema, SchemaDocument};

/// 加载分类体系文档
///
/// 任何问题都是致命错误：宁可中止，也不从空体系开始。
pub fn load_schema(path: &Path) -> Result<SchemaDocument, SchemaFileError> {
    let content = fs::read_to_string(path).map_err(|source| SchemaFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let document = SchemaDocument::parse(&content).map_err(|source| SchemaFileError::Parse {
        path: path.to_path_buf(),
        source,
    })??;

    info!(
        "✓ 已加载分类体系 {}: {} 个类别, {} 个标签",
        path.display(),
        document.schema.categories().len(),
        document.schema.tag_count()
    );
    Ok(document)
}

/// 原子写回分类体系文档
pub fn save_schema(path: &Path, document: &SchemaDocument) -> Result<(), SchemaFileError> {
    write_atomically(path, document.to_json_string().as_bytes()).map_err(|source| {
        SchemaFileError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// 读取自定义分类规则（原样嵌入每个提示词）；未配置时为空
pub fn load_instructions(path: Option<&Path>) -> std::io::Result<String> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            if text.trim().is_empty() {
                warn!("⚠️ 自定义规则文件 {} 为空", path.display());
            }
            Ok(text)
        }
        None => Ok(String::new()),
    }
}

/// 输出分类体系概要：每个类别的子类数、标签数和若干示例标签
pub fn log_schema_summary(schema: &Schema) {
    info!("📚 分类体系概要:");
    for category in schema.categories() {
        let total: usize = category.subcategories.iter().map(|s| s.tags.len()).sum();
        let samples: Vec<&str> = category
            .subcategories
            .iter()
            .take(2)
            .flat_map(|sub| sub.tags.iter().take(3).map(String::as_str))
            .take(5)
            .collect();
        info!(
            "  {}: {} 个子类, {} 个标签, 示例: {:?}",
            category.name,
            category.subcategories.len(),
            total,
            samples
        );
    }
}
