use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ExtractError;

/// 发票字段类别 (封闭枚举，名称 <-> 下标 双向全映射)
///
/// 下标即模型训练使用的整数标签，与具体模型无关，
/// 因此同一训练集训练出的不同模型标签互相兼容。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Others")]
    Others,
    #[serde(rename = "Account number")]
    AccountNumber,
    #[serde(rename = "Consumption period")]
    ConsumptionPeriod,
    #[serde(rename = "Country of consumption")]
    CountryOfConsumption,
    #[serde(rename = "Currency of invoice")]
    CurrencyOfInvoice,
    #[serde(rename = "Date of invoice")]
    DateOfInvoice,
    #[serde(rename = "Invoice number")]
    InvoiceNumber,
    #[serde(rename = "Name of provider")]
    NameOfProvider,
    #[serde(rename = "PO Number")]
    PoNumber,
    #[serde(rename = "Tax")]
    Tax,
    #[serde(rename = "Total amount")]
    TotalAmount,
}

impl Category {
    pub const COUNT: usize = 11;

    /// 按下标顺序排列的全部类别
    pub const ALL: [Category; Category::COUNT] = [
        Category::Others,
        Category::AccountNumber,
        Category::ConsumptionPeriod,
        Category::CountryOfConsumption,
        Category::CurrencyOfInvoice,
        Category::DateOfInvoice,
        Category::InvoiceNumber,
        Category::NameOfProvider,
        Category::PoNumber,
        Category::Tax,
        Category::TotalAmount,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Category> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Others => "Others",
            Category::AccountNumber => "Account number",
            Category::ConsumptionPeriod => "Consumption period",
            Category::CountryOfConsumption => "Country of consumption",
            Category::CurrencyOfInvoice => "Currency of invoice",
            Category::DateOfInvoice => "Date of invoice",
            Category::InvoiceNumber => "Invoice number",
            Category::NameOfProvider => "Name of provider",
            Category::PoNumber => "PO Number",
            Category::Tax => "Tax",
            Category::TotalAmount => "Total amount",
        }
    }

    /// 是否为业务字段 (非 "Others")
    pub fn is_field(self) -> bool {
        self != Category::Others
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| ExtractError::InvalidInput(format!("unknown category '{}'", s)))
    }
}
