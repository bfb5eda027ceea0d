//! 分类体系（Taxonomy）
//!
//! 结构：类别 → 子类 → 有序标签列表。子类只用于组织，真正可被选择的值是叶子标签。
//!
//! 不变量（构造时校验，之后不可变）：
//! - 任一标签字符串在整个体系内只出现一次
//! - 类别名、子类名、标签均非空；标签不含逗号（结果表的多值分隔符）
//! - 类别名互不相同；同一类别下子类名互不相同
//!
//! 序列化保留文档原有顺序，load → save 无损往返。

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SchemaFileError;

/// 子类：组织性分组，本身不是可选值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subcategory {
    pub name: String,
    pub tags: Vec<String>,
}

/// 类别：结果表中的一列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    /// 扁平化视图：按文档顺序列出该类别下的全部叶子标签
    pub fn flattened(&self) -> impl Iterator<Item = &str> {
        self.subcategories
            .iter()
            .flat_map(|sub| sub.tags.iter().map(String::as_str))
    }

    pub fn subcategory(&self, name: &str) -> Option<&Subcategory> {
        self.subcategories.iter().find(|sub| sub.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagLocation {
    category: usize,
    subcategory: usize,
}

/// 已校验、不可变的分类体系
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    categories: Vec<Category>,
    tag_index: HashMap<String, TagLocation>,
}

impl Schema {
    /// 校验不变量并建立标签索引
    pub fn new(categories: Vec<Category>) -> Result<Self, SchemaFileError> {
        if categories.is_empty() {
            return Err(SchemaFileError::invalid("分类体系中没有任何类别"));
        }

        let mut tag_index: HashMap<String, TagLocation> = HashMap::new();
        for (ci, category) in categories.iter().enumerate() {
            if category.name.trim().is_empty() {
                return Err(SchemaFileError::invalid("类别名不能为空"));
            }
            if categories[..ci].iter().any(|c| c.name == category.name) {
                return Err(SchemaFileError::invalid(format!(
                    "类别 '{}' 重复出现",
                    category.name
                )));
            }

            for (si, sub) in category.subcategories.iter().enumerate() {
                if sub.name.trim().is_empty() {
                    return Err(SchemaFileError::invalid(format!(
                        "类别 '{}' 下存在空的子类名",
                        category.name
                    )));
                }
                if category.subcategories[..si].iter().any(|s| s.name == sub.name) {
                    return Err(SchemaFileError::invalid(format!(
                        "类别 '{}' 下子类 '{}' 重复出现",
                        category.name, sub.name
                    )));
                }

                for tag in &sub.tags {
                    if tag.trim().is_empty() {
                        return Err(SchemaFileError::invalid(format!(
                            "{}/{} 下存在空标签",
                            category.name, sub.name
                        )));
                    }
                    if tag.contains(',') {
                        return Err(SchemaFileError::invalid(format!(
                            "标签 '{}' 含有逗号，无法写入结果表",
                            tag
                        )));
                    }
                    let here = TagLocation {
                        category: ci,
                        subcategory: si,
                    };
                    if let Some(first) = tag_index.insert(tag.clone(), here) {
                        return Err(SchemaFileError::DuplicateTag {
                            tag: tag.clone(),
                            first: location_label(&categories, first),
                            second: location_label(&categories, here),
                        });
                    }
                }
            }
        }

        Ok(Self {
            categories,
            tag_index,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// 某类别的扁平化标签（类别不存在时为 None）
    pub fn flattened(&self, category: &str) -> Option<Vec<&str>> {
        self.category(category).map(|c| c.flattened().collect())
    }

    /// 标签是否属于该类别的扁平化集合（精确、区分大小写）
    pub fn contains_tag(&self, category: &str, tag: &str) -> bool {
        self.tag_index
            .get(tag)
            .is_some_and(|loc| self.categories[loc.category].name == category)
    }

    /// 标签所在的 (类别, 子类)
    pub fn locate(&self, tag: &str) -> Option<(&str, &str)> {
        self.tag_index.get(tag).map(|loc| {
            let category = &self.categories[loc.category];
            (
                category.name.as_str(),
                category.subcategories[loc.subcategory].name.as_str(),
            )
        })
    }

    pub fn tag_count(&self) -> usize {
        self.tag_index.len()
    }

    /// 取出类别列表，用于构造新版本
    pub fn into_categories(self) -> Vec<Category> {
        self.categories
    }
}

fn location_label(categories: &[Category], loc: TagLocation) -> String {
    let category = &categories[loc.category];
    format!(
        "{}/{}",
        category.name, category.subcategories[loc.subcategory].name
    )
}

/// 分类体系文档：体系本身 + 是否带 `{"schema": {...}}` 外层包装
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    pub schema: Schema,
    pub enveloped: bool,
}

impl SchemaDocument {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            enveloped: false,
        }
    }

    /// 解析 JSON 文档；结构错误返回 serde_json 错误，不变量错误返回 SchemaFileError
    pub fn parse(content: &str) -> Result<Result<Self, SchemaFileError>, serde_json::Error> {
        if let Ok(envelope) = serde_json::from_str::<Envelope>(content) {
            return Ok(Schema::new(envelope.schema.0).map(|schema| Self {
                schema,
                enveloped: true,
            }));
        }
        let CategoryList(categories) = serde_json::from_str(content)?;
        Ok(Schema::new(categories).map(Self::new))
    }

    /// 序列化为两空格缩进的 JSON（末尾带换行），保持包装形式
    pub fn to_json_string(&self) -> String {
        let body = if self.enveloped {
            serde_json::to_string_pretty(&EnvelopeRef {
                schema: &self.schema,
            })
        } else {
            serde_json::to_string_pretty(&self.schema)
        };
        // 全部由字符串与列表组成，序列化不会失败
        let mut body = body.unwrap_or_default();
        body.push('\n');
        body
    }
}

// ========== serde ==========

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.categories.len()))?;
        for category in &self.categories {
            map.serialize_entry(&category.name, &SubcategoriesRef(&category.subcategories))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let CategoryList(categories) = CategoryList::deserialize(deserializer)?;
        Schema::new(categories).map_err(de::Error::custom)
    }
}

struct SubcategoriesRef<'a>(&'a [Subcategory]);

impl Serialize for SubcategoriesRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for sub in self.0 {
            map.serialize_entry(&sub.name, &sub.tags)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema: &'a Schema,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    schema: CategoryList,
}

/// 保持顺序的 类别 → 子类列表
struct CategoryList(Vec<Category>);

impl<'de> Deserialize<'de> for CategoryList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CategoryListVisitor;

        impl<'de> Visitor<'de> for CategoryListVisitor {
            type Value = CategoryList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category -> subcategory -> tag list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut categories = Vec::new();
                while let Some((name, SubcategoryList(subcategories))) =
                    map.next_entry::<String, SubcategoryList>()?
                {
                    categories.push(Category {
                        name,
                        subcategories,
                    });
                }
                Ok(CategoryList(categories))
            }
        }

        deserializer.deserialize_map(CategoryListVisitor)
    }
}

struct SubcategoryList(Vec<Subcategory>);

impl<'de> Deserialize<'de> for SubcategoryList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SubcategoryListVisitor;

        impl<'de> Visitor<'de> for SubcategoryListVisitor {
            type Value = SubcategoryList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of subcategory -> tag list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut subcategories = Vec::new();
                while let Some((name, tags)) = map.next_entry::<String, Vec<String>>()? {
                    subcategories.push(Subcategory { name, tags });
                }
                Ok(SubcategoryList(subcategories))
            }
        }

        deserializer.deserialize_map(SubcategoryListVisitor)
    }
}
