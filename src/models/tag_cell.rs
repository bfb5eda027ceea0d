//! 结果表中多值标签单元格的序列化形式
//!
//! 写出：`a, b, c`。读入时兼容 JSON 数组形式（人工编辑时常见），
//! 无法识别的内容视为零个标签，不报错。

/// 多值分隔符
pub const TAG_SEPARATOR: &str = ", ";

const NULL_TOKENS: [&str; 2] = ["nan", "none"];

/// 将标签列表写成单元格文本
pub fn format_tags(tags: &[String]) -> String {
    tags.join(TAG_SEPARATOR)
}

/// 解析单元格文本为标签列表（去空白、去重、保留首次出现顺序）
pub fn parse_tags(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Vec::new();
    }

    let raw: Vec<String> = if cell.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(cell) {
            Ok(items) => items,
            Err(_) => return Vec::new(),
        }
    } else {
        cell.split(',').map(str::to_string).collect()
    };

    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for tag in raw {
        let tag = tag.trim();
        if tag.is_empty() || NULL_TOKENS.iter().any(|t| tag.eq_ignore_ascii_case(t)) {
            continue;
        }
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comma_separated() {
        assert_eq!(
            parse_tags("investment_scam, job_fraud,sim_card_fraud "),
            vec!["investment_scam", "job_fraud", "sim_card_fraud"]
        );
    }

    #[test]
    fn test_parse_skips_null_tokens_and_duplicates() {
        assert_eq!(parse_tags("a, NaN, , none, a, b"), vec!["a", "b"]);
        assert!(parse_tags("").is_empty());
        assert!(parse_tags("   ").is_empty());
    }

    #[test]
    fn test_parse_json_array_form() {
        assert_eq!(parse_tags(r#"["a", "b"]"#), vec!["a", "b"]);
        assert!(parse_tags(r#"["a", 1"#).is_empty());
    }

    #[test]
    fn test_format_then_parse() {
        let tags = vec!["x".to_string(), "y".to_string()];
        assert_eq!(format_tags(&tags), "x, y");
        assert_eq!(parse_tags(&format_tags(&tags)), tags);
        assert_eq!(format_tags(&[]), "");
    }
}
