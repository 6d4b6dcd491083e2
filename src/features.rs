//! 特征向量提供者接口与特征白名单投影

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ExtractError, Result};
use crate::models::{FeatureMap, InvoicePage, Token};

/// 外部特征引擎: 给定 token 及其所在页，返回 特征名 -> 数值
pub trait FeatureProvider: Send + Sync {
    fn compute_features(&self, token: &Token, page: &InvoicePage) -> FeatureMap;
}

/// 直接返回语料中预先计算好的特征
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecomputedFeatures;

impl FeatureProvider for PrecomputedFeatures {
    fn compute_features(&self, token: &Token, _page: &InvoicePage) -> FeatureMap {
        token.features.clone()
    }
}

impl<F> FeatureProvider for F
where
    F: Fn(&Token, &InvoicePage) -> FeatureMap + Send + Sync,
{
    fn compute_features(&self, token: &Token, page: &InvoicePage) -> FeatureMap {
        self(token, page)
    }
}

/// 有序特征白名单
///
/// 训练与推理必须使用同一顺序，否则坐标语义错位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSet {
    names: Vec<String>,
}

impl FeatureSet {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "feature allow-list is empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ExtractError::InvalidConfig(format!(
                    "feature '{}' listed more than once",
                    name
                )));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 按白名单顺序投影；缺任一特征立即失败，不补零
    pub fn project(&self, features: &FeatureMap) -> Result<Vec<f64>> {
        self.names
            .iter()
            .map(|name| {
                features.get(name).copied().ok_or_else(|| {
                    ExtractError::FeatureMismatch(format!(
                        "provider did not supply enabled feature '{}'",
                        name
                    ))
                })
            })
            .collect()
    }
}

impl TryFrom<Vec<String>> for FeatureSet {
    type Error = ExtractError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        FeatureSet::new(names)
    }
}

impl From<FeatureSet> for Vec<String> {
    fn from(set: FeatureSet) -> Self {
        set.names
    }
}

/// 默认启用的特征
pub const DEFAULT_FEATURES: &[&str] = &[
    "rel_dist_top",
    "contains_date",
    "contains_currency",
    "contains_specific_currency",
    "contains_date_range",
    "contains_address",
    "contains_digit",
    "contains_company",
    "vert_align_to_cell_w_currency",
    "vert_align_to_cell_w_datelabel",
    "vert_align_to_cell_w_dateofinvoicelabel",
    "vert_align_to_cell_w_totallabel",
    "vert_align_to_cell_w_amountlabel",
    "vert_align_to_cell_w_invoicenum_label",
    "vert_align_to_cell_w_accountnum_label",
    "vert_align_to_cell_w_ponum_label",
    "vert_align_to_cell_w_tax_label",
    "hori_align_to_cell_w_currency",
    "hori_align_to_cell_w_datelabel",
    "hori_align_to_cell_w_dateofinvoicelabel",
    "hori_align_to_cell_w_totallabel",
    "hori_align_to_cell_w_amountlabel",
    "hori_align_to_cell_w_invoicenum_label",
    "hori_align_to_cell_w_accountnum_label",
    "hori_align_to_cell_w_ponum_label",
    "hori_align_to_cell_w_tax_label",
    "rel_dist_nearest_cell_w_currency",
    "rel_dist_nearest_cell_w_datelabel",
    "rel_dist_nearest_cell_w_invoicedatelabel",
    "rel_dist_nearest_cell_w_invoicenumlabel",
    "rel_dist_nearest_cell_w_accnumlabel",
    "rel_dist_nearest_cell_w_ponumlabel",
    "rel_dist_nearest_cell_w_totallabel",
    "rel_dist_nearest_cell_w_amountlabel",
    "rel_dist_nearest_cell_w_tax_label",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_follows_allow_list_order() {
        let set = FeatureSet::new(["b", "a"]).unwrap();
        let token = Token::new("x")
            .with_feature("a", 1.0)
            .with_feature("b", 2.0)
            .with_feature("c", 3.0);
        let page = InvoicePage::default();
        let features = PrecomputedFeatures.compute_features(&token, &page);
        assert_eq!(set.project(&features).unwrap(), vec![2.0, 1.0]);
    }

    #[test]
    fn missing_feature_fails_fast() {
        let set = FeatureSet::new(["a", "missing"]).unwrap();
        let token = Token::new("x").with_feature("a", 1.0);
        let err = set.project(&token.features).unwrap_err();
        assert!(matches!(err, ExtractError::FeatureMismatch(msg) if msg.contains("missing")));
    }

    #[test]
    fn rejects_empty_and_duplicate_lists() {
        assert!(FeatureSet::new(Vec::<String>::new()).is_err());
        assert!(FeatureSet::new(["a", "b", "a"]).is_err());
    }

    #[test]
    fn closures_act_as_providers() {
        let provider = |token: &Token, _: &InvoicePage| {
            let mut map = FeatureMap::new();
            map.insert("len".to_string(), token.text.len() as f64);
            map
        };
        let map = provider.compute_features(&Token::new("abcd"), &InvoicePage::default());
        assert_eq!(map["len"], 4.0);
    }

    #[test]
    fn default_list_has_no_duplicates() {
        assert!(FeatureSet::new(DEFAULT_FEATURES.iter().copied()).is_ok());
    }
}
