use serde::{Deserialize, Serialize};

use super::{Category, Invoice, LocatedToken};

/// 训练/评估样本集
///
/// `features`、`categories`、`tokens` 三个序列按下标一一对应。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub categories: Vec<Category>,
    pub tokens: Vec<LocatedToken>,
    /// 构建失败被跳过的发票
    #[serde(default)]
    pub skipped: Vec<String>,
}

impl Dataset {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, features: Vec<f64>, category: Category, token: LocatedToken) {
        self.features.push(features);
        self.categories.push(category);
        self.tokens.push(token);
    }

    /// 追加另一份同特征的样本 (保持三序列对齐)
    pub(crate) fn append(&mut self, other: Dataset) {
        self.features.extend(other.features);
        self.categories.extend(other.categories);
        self.tokens.extend(other.tokens);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// 非 "Others" 样本数
    pub fn field_count(&self) -> usize {
        self.categories.iter().filter(|c| c.is_field()).count()
    }

    pub fn others_count(&self) -> usize {
        self.len() - self.field_count()
    }
}

/// 一次训练/测试划分的结果
#[derive(Debug, Clone)]
pub struct TrainTestPacket {
    pub train: Dataset,
    pub test: Dataset,
    pub train_invoices: Vec<Invoice>,
    pub test_invoices: Vec<Invoice>,
}
