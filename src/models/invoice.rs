use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Category;

/// 特征名 -> 数值
pub type FeatureMap = HashMap<String, f64>;

/// 页面内相对坐标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// OCR 文本单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default)]
    pub bbox: BoundingBox,
    /// 标注类别 (训练语料才有)
    #[serde(default)]
    pub category: Option<Category>,
    /// 外部特征引擎预先计算好的特征
    #[serde(default)]
    pub features: FeatureMap,
}

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bbox: BoundingBox::default(),
            category: None,
            features: FeatureMap::new(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }
}

/// 发票单页
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoicePage {
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl InvoicePage {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            tokens,
        }
    }
}

/// 发票 (训练/测试划分的最小单位)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// 文档标识，缺省时由语料加载器按文件名补齐
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pages: Vec<InvoicePage>,
}

impl Invoice {
    pub fn new(name: impl Into<String>, pages: Vec<InvoicePage>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }

    pub fn token_count(&self) -> usize {
        self.pages.iter().map(|p| p.tokens.len()).sum()
    }

    /// 按 (页, 页内顺序) 遍历全部 token
    pub fn tokens(&self) -> impl Iterator<Item = (usize, usize, &Token)> {
        self.pages.iter().enumerate().flat_map(|(page_idx, page)| {
            page.tokens
                .iter()
                .enumerate()
                .map(move |(pos, token)| (page_idx, pos, token))
        })
    }
}

/// 带来源位置的 token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedToken {
    pub document: String,
    pub page: usize,
    pub position: usize,
    pub token: Token,
}
