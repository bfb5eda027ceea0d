/// 待分类的案例（不可变输入记录）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub id: String,
    pub text: String,
    /// 数据集中其余列，按原顺序原样透传到结果表
    pub metadata: Vec<(String, String)>,
}

impl Case {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Vec::new(),
        }
    }

    pub fn metadata_value(&self, column: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}
