use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Category, LocatedToken};

/// 单个类别的抽取结果
///
/// `confidence == 0` 且无 token 表示未命中，不是低置信度命中。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldAssignment {
    pub token: Option<LocatedToken>,
    pub confidence: f64,
}

impl FieldAssignment {
    pub fn is_assigned(&self) -> bool {
        self.token.is_some() && self.confidence > 0.0
    }

    pub fn text(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.token.text.as_str())
    }
}

/// 一张发票全部类别的抽取结果 (按类别下标保序)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssignments {
    pub document: String,
    assignments: IndexMap<Category, FieldAssignment>,
}

impl FieldAssignments {
    /// 每个类别初始化为 (无 token, 置信度 0)
    pub fn empty(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            assignments: Category::ALL
                .iter()
                .map(|&c| (c, FieldAssignment::default()))
                .collect(),
        }
    }

    pub fn get(&self, category: Category) -> &FieldAssignment {
        // 构造时已填满全部类别
        &self.assignments[&category]
    }

    /// 置信度严格大于当前最优时替换，返回是否替换
    pub fn offer(&mut self, category: Category, token: &LocatedToken, confidence: f64) -> bool {
        let slot = self
            .assignments
            .entry(category)
            .or_insert_with(FieldAssignment::default);
        if confidence > slot.confidence {
            *slot = FieldAssignment {
                token: Some(token.clone()),
                confidence,
            };
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &FieldAssignment)> {
        self.assignments.iter().map(|(c, a)| (*c, a))
    }

    /// 已命中的业务字段 (排除 "Others")
    pub fn business_fields(&self) -> impl Iterator<Item = (Category, &FieldAssignment)> {
        self.iter()
            .filter(|(c, a)| c.is_field() && a.is_assigned())
    }

    pub fn assigned_count(&self) -> usize {
        self.business_fields().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Token;

    fn located(text: &str) -> LocatedToken {
        LocatedToken {
            document: "inv".to_string(),
            page: 0,
            position: 0,
            token: Token::new(text),
        }
    }

    #[test]
    fn starts_unassigned_for_every_category() {
        let fields = FieldAssignments::empty("inv");
        for category in Category::ALL {
            let a = fields.get(category);
            assert!(a.token.is_none());
            assert_eq!(a.confidence, 0.0);
            assert!(!a.is_assigned());
        }
    }

    #[test]
    fn equal_confidence_does_not_overwrite() {
        let mut fields = FieldAssignments::empty("inv");
        assert!(fields.offer(Category::Tax, &located("first"), 0.5));
        assert!(!fields.offer(Category::Tax, &located("second"), 0.5));
        assert_eq!(fields.get(Category::Tax).text(), Some("first"));
        assert!(fields.offer(Category::Tax, &located("third"), 0.6));
        assert_eq!(fields.get(Category::Tax).text(), Some("third"));
    }

    #[test]
    fn business_fields_skip_others() {
        let mut fields = FieldAssignments::empty("inv");
        fields.offer(Category::Others, &located("noise"), 0.99);
        fields.offer(Category::TotalAmount, &located("$12.00"), 0.7);
        let listed: Vec<_> = fields.business_fields().map(|(c, _)| c).collect();
        assert_eq!(listed, vec![Category::TotalAmount]);
    }
}
