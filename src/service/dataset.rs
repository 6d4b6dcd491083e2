use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{ExtractError, Result};
use crate::features::{FeatureProvider, FeatureSet};
use crate::models::{Category, Dataset, Invoice, InvoicePage, LocatedToken, Token, TrainTestPacket};

/// "Others" 最多保留为已保留非 "Others" token 数的该比例
pub const OTHERS_SCALING_FACTOR: f64 = 0.3;

/// 默认训练集比例
pub const DEFAULT_TRAIN_RATIO: f64 = 0.8;

/// 单遍流式的 "Others" 抽样器
///
/// 对每个 token 的保留决定只依赖之前已保留的计数，结果由遍历顺序唯一确定。
#[derive(Debug, Clone, Copy)]
pub struct OthersBalancer {
    scaling_factor: f64,
    kept_fields: usize,
    kept_others: usize,
}

impl OthersBalancer {
    pub fn new(scaling_factor: f64) -> Self {
        Self {
            scaling_factor,
            kept_fields: 0,
            kept_others: 0,
        }
    }

    /// 判断是否保留，并更新计数
    pub fn admit(&mut self, category: Category) -> bool {
        if category.is_field() {
            self.kept_fields += 1;
            true
        } else if (self.kept_others as f64) < self.kept_fields as f64 * self.scaling_factor {
            self.kept_others += 1;
            true
        } else {
            false
        }
    }

    pub fn kept_fields(&self) -> usize {
        self.kept_fields
    }

    pub fn kept_others(&self) -> usize {
        self.kept_others
    }
}

/// 样本集构建服务: 调用特征引擎、按白名单投影、按需平衡 "Others"
pub struct DatasetAssembler<P> {
    provider: P,
    features: FeatureSet,
    others_scaling_factor: f64,
}

impl<P: FeatureProvider> DatasetAssembler<P> {
    pub fn new(provider: P, features: FeatureSet) -> Self {
        Self {
            provider,
            features,
            others_scaling_factor: OTHERS_SCALING_FACTOR,
        }
    }

    pub fn with_scaling_factor(mut self, factor: f64) -> Self {
        self.others_scaling_factor = factor;
        self
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// 构建带标签的样本集
    ///
    /// 每个 token 都必须有标注类别。`balance_others` 开启时按语料顺序单遍抽样 "Others"。
    /// 某张发票失败时整张跳过 (记入 `skipped`)，不留下部分样本，也不影响抽样计数。
    pub fn build_dataset(&self, invoices: &[Invoice], balance_others: bool) -> Result<Dataset> {
        let mut dataset = Dataset::new(self.features.names().to_vec());
        let mut balancer = OthersBalancer::new(self.others_scaling_factor);
        let mut dropped = 0usize;

        for invoice in invoices {
            let mut staged_balancer = balancer;
            match self.assemble_invoice(invoice, balance_others.then_some(&mut staged_balancer)) {
                Ok((staged, staged_dropped)) => {
                    dataset.append(staged);
                    balancer = staged_balancer;
                    dropped += staged_dropped;
                }
                Err(e) => {
                    tracing::warn!("Skipping invoice {} during dataset assembly: {}", invoice.name, e);
                    dataset.skipped.push(invoice.name.clone());
                }
            }
        }

        tracing::info!(
            "Built dataset from {} invoices: {} samples ({} fields, {} others, {} others dropped, {} invoices skipped)",
            invoices.len(),
            dataset.len(),
            dataset.field_count(),
            dataset.others_count(),
            dropped,
            dataset.skipped.len()
        );
        Ok(dataset)
    }

    /// 单张发票的样本，返回 (样本, 丢弃的 "Others" 数)
    fn assemble_invoice(
        &self,
        invoice: &Invoice,
        mut balancer: Option<&mut OthersBalancer>,
    ) -> Result<(Dataset, usize)> {
        let mut staged = Dataset::new(Vec::new());
        let mut dropped = 0usize;

        for (page_idx, page) in invoice.pages.iter().enumerate() {
            for (position, token) in page.tokens.iter().enumerate() {
                let category = token.category.ok_or_else(|| ExtractError::MissingLabel {
                    document: invoice.name.clone(),
                    page: page_idx,
                    position,
                })?;

                if let Some(balancer) = balancer.as_deref_mut() {
                    if !balancer.admit(category) {
                        dropped += 1;
                        continue;
                    }
                }

                let vector = self.project(token, page, &invoice.name, page_idx, position)?;
                staged.push(
                    vector,
                    category,
                    LocatedToken {
                        document: invoice.name.clone(),
                        page: page_idx,
                        position,
                        token: token.clone(),
                    },
                );
            }
        }
        Ok((staged, dropped))
    }

    /// 计算并投影单个 token 的特征，缺失特征时附带所在位置
    fn project(
        &self,
        token: &Token,
        page: &InvoicePage,
        document: &str,
        page_idx: usize,
        position: usize,
    ) -> Result<Vec<f64>> {
        let raw = self.provider.compute_features(token, page);
        self.features.project(&raw).map_err(|e| match e {
            ExtractError::FeatureMismatch(message) => ExtractError::FeatureMismatch(format!(
                "{} (document '{}', page {}, token {})",
                message, document, page_idx, position
            )),
            other => other,
        })
    }

    /// 计算一张发票全部 token 的特征 (不抽样，不需要标签)
    pub fn featurize(&self, invoice: &Invoice) -> Result<(Vec<Vec<f64>>, Vec<LocatedToken>)> {
        let mut rows = Vec::with_capacity(invoice.token_count());
        let mut tokens = Vec::with_capacity(invoice.token_count());
        for (page_idx, page) in invoice.pages.iter().enumerate() {
            for (position, token) in page.tokens.iter().enumerate() {
                rows.push(self.project(token, page, &invoice.name, page_idx, position)?);
                tokens.push(LocatedToken {
                    document: invoice.name.clone(),
                    page: page_idx,
                    position,
                    token: token.clone(),
                });
            }
        }
        Ok((rows, tokens))
    }

    /// 按发票划分并构建训练集 (可平衡) 与测试集 (不平衡)
    pub fn create_train_and_test_packet(
        &self,
        invoices: &[Invoice],
        train_ratio: f64,
        seed: u64,
        balance_train: bool,
    ) -> Result<TrainTestPacket> {
        let (train_invoices, test_invoices) = split_train_test(invoices, train_ratio, seed)?;
        tracing::info!(
            "Split {} invoices into {} train / {} test",
            invoices.len(),
            train_invoices.len(),
            test_invoices.len()
        );

        let train = self.build_dataset(&train_invoices, balance_train)?;
        let test = self.build_dataset(&test_invoices, false)?;
        Ok(TrainTestPacket {
            train,
            test,
            train_invoices,
            test_invoices,
        })
    }
}

/// 按发票随机划分训练/测试集 (同一发票的 token 不会跨集合)
///
/// 训练集大小为 `floor(len × ratio)`，同一 seed 结果确定。
pub fn split_train_test(invoices: &[Invoice], ratio: f64, seed: u64) -> Result<(Vec<Invoice>, Vec<Invoice>)> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(ExtractError::InvalidConfig(format!(
            "train ratio must be within [0, 1], got {}",
            ratio
        )));
    }

    let mut shuffled = invoices.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let split_at = (shuffled.len() as f64 * ratio).floor() as usize;
    let test = shuffled.split_off(split_at.min(shuffled.len()));
    Ok((shuffled, test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::PrecomputedFeatures;
    use crate::models::{InvoicePage, Token};
    use std::collections::HashSet;

    fn token(category: Category, value: f64) -> Token {
        Token::new(format!("{}-{}", category, value))
            .with_category(category)
            .with_feature("a", value)
            .with_feature("b", 1.0 - value)
    }

    fn assembler() -> DatasetAssembler<PrecomputedFeatures> {
        DatasetAssembler::new(PrecomputedFeatures, FeatureSet::new(["a", "b"]).unwrap())
    }

    fn invoice(name: &str, tokens: Vec<Token>) -> Invoice {
        Invoice::new(name, vec![InvoicePage::new(tokens)])
    }

    #[test]
    fn balancer_holds_bound_on_every_prefix() {
        let pattern = [
            Category::Others,
            Category::Others,
            Category::Tax,
            Category::Others,
            Category::Others,
            Category::Others,
            Category::TotalAmount,
            Category::InvoiceNumber,
            Category::Others,
            Category::Others,
            Category::DateOfInvoice,
            Category::Others,
        ];
        let mut balancer = OthersBalancer::new(OTHERS_SCALING_FACTOR);
        for round in 0..20 {
            for &category in &pattern {
                let kept = balancer.admit(category);
                if category.is_field() {
                    assert!(kept, "field tokens are always kept (round {})", round);
                }
                let bound = (OTHERS_SCALING_FACTOR * balancer.kept_fields() as f64).ceil() as usize;
                assert!(balancer.kept_others() <= bound);
            }
        }
    }

    #[test]
    fn leading_others_are_dropped_until_fields_appear() {
        let mut balancer = OthersBalancer::new(0.3);
        assert!(!balancer.admit(Category::Others));
        assert!(balancer.admit(Category::Tax));
        // 0 < 1 * 0.3
        assert!(balancer.admit(Category::Others));
        // 1 < 0.3 不成立
        assert!(!balancer.admit(Category::Others));
    }

    #[test]
    fn balanced_dataset_keeps_all_fields_and_stays_aligned() {
        let tokens = vec![
            token(Category::Others, 0.1),
            token(Category::Tax, 0.2),
            token(Category::Others, 0.3),
            token(Category::Others, 0.4),
            token(Category::TotalAmount, 0.5),
            token(Category::Others, 0.6),
        ];
        let dataset = assembler()
            .build_dataset(&[invoice("inv-1", tokens)], true)
            .unwrap();

        // Others 依次: 丢弃, 保留 (0 < 0.3), 丢弃 (1 < 0.3 不成立), 丢弃 (1 < 0.6 不成立)
        assert_eq!(dataset.field_count(), 2);
        assert_eq!(dataset.others_count(), 1);
        assert_eq!(dataset.features.len(), dataset.categories.len());
        assert_eq!(dataset.features.len(), dataset.tokens.len());
        for ((row, category), located) in dataset
            .features
            .iter()
            .zip(&dataset.categories)
            .zip(&dataset.tokens)
        {
            assert_eq!(Some(*category), located.token.category);
            assert_eq!(row[0], located.token.features["a"]);
        }
    }

    #[test]
    fn unbalanced_dataset_keeps_everything() {
        let tokens = vec![token(Category::Others, 0.1), token(Category::Others, 0.2)];
        let dataset = assembler()
            .build_dataset(&[invoice("inv-1", tokens)], false)
            .unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.feature_names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unlabelled_invoice_is_skipped() {
        let tokens = vec![Token::new("?").with_feature("a", 0.0).with_feature("b", 0.0)];
        let dataset = assembler()
            .build_dataset(&[invoice("inv-9", tokens)], false)
            .unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.skipped, vec!["inv-9".to_string()]);
    }

    #[test]
    fn missing_feature_skips_only_that_invoice() {
        let tokens = vec![Token::new("x").with_category(Category::Tax).with_feature("a", 1.0)];
        let dataset = assembler()
            .build_dataset(
                &[
                    invoice("inv-1", vec![token(Category::Tax, 0.5)]),
                    invoice("inv-2", tokens),
                ],
                false,
            )
            .unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.tokens[0].document, "inv-1");
        assert_eq!(dataset.skipped, vec!["inv-2".to_string()]);
    }

    #[test]
    fn broken_invoice_leaves_no_rows_and_no_balancer_credit() {
        // 坏发票前面的字段 token 若被计入，会让其后的 Others 被保留
        let broken = invoice(
            "broken",
            vec![
                token(Category::Tax, 0.1),
                token(Category::TotalAmount, 0.2),
                token(Category::Tax, 0.3),
                token(Category::Tax, 0.4),
                Token::new("?").with_feature("a", 0.0).with_feature("b", 0.0),
            ],
        );
        let good = invoice(
            "good",
            vec![token(Category::Others, 0.5), token(Category::Tax, 0.6)],
        );
        let dataset = assembler().build_dataset(&[broken, good], true).unwrap();

        assert_eq!(dataset.skipped, vec!["broken".to_string()]);
        assert!(dataset.tokens.iter().all(|t| t.document == "good"));
        assert_eq!(dataset.field_count(), 1);
        assert_eq!(dataset.others_count(), 0);
        assert_eq!(dataset.features.len(), dataset.categories.len());
        assert_eq!(dataset.features.len(), dataset.tokens.len());
    }

    #[test]
    fn missing_feature_message_names_location_once() {
        let tokens = vec![
            token(Category::Tax, 0.5),
            Token::new("x").with_category(Category::Tax).with_feature("a", 1.0),
        ];
        let err = assembler().featurize(&invoice("inv-2", tokens)).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ExtractError::FeatureMismatch(_)));
        assert_eq!(message.matches("feature mismatch").count(), 1, "{message}");
        assert!(message.contains("'b'"));
        assert!(message.contains("document 'inv-2', page 0, token 1"));
    }

    #[test]
    fn split_is_a_partition_of_invoices() {
        let invoices: Vec<Invoice> = (0..23)
            .map(|i| invoice(&format!("inv-{}", i), vec![token(Category::Tax, i as f64)]))
            .collect();
        let (train, test) = split_train_test(&invoices, 0.8, 42).unwrap();
        assert_eq!(train.len(), 18);
        assert_eq!(test.len(), 5);

        let train_names: HashSet<_> = train.iter().map(|i| i.name.clone()).collect();
        let test_names: HashSet<_> = test.iter().map(|i| i.name.clone()).collect();
        assert!(train_names.is_disjoint(&test_names));
        assert_eq!(train_names.len() + test_names.len(), invoices.len());

        let train_tokens: Vec<&Token> = train.iter().flat_map(|i| i.tokens().map(|(_, _, t)| t)).collect();
        for test_invoice in &test {
            for (_, _, t) in test_invoice.tokens() {
                assert!(!train_tokens.contains(&t));
            }
        }
    }

    #[test]
    fn split_is_deterministic_for_seed() {
        let invoices: Vec<Invoice> = (0..10).map(|i| invoice(&format!("inv-{}", i), vec![])).collect();
        let (a, _) = split_train_test(&invoices, 0.5, 7).unwrap();
        let (b, _) = split_train_test(&invoices, 0.5, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn split_rejects_bad_ratio() {
        assert!(split_train_test(&[], 1.5, 0).is_err());
        assert!(split_train_test(&[], -0.1, 0).is_err());
    }

    #[test]
    fn packet_never_balances_test_side() {
        let invoices: Vec<Invoice> = (0..5)
            .map(|i| {
                invoice(
                    &format!("inv-{}", i),
                    vec![token(Category::Others, 0.1), token(Category::Others, 0.2)],
                )
            })
            .collect();
        let packet = assembler()
            .create_train_and_test_packet(&invoices, 0.8, 1, true)
            .unwrap();
        assert_eq!(packet.train.len(), 0);
        assert_eq!(packet.test.len(), 2);
        assert_eq!(packet.train_invoices.len(), 4);
        assert_eq!(packet.test_invoices.len(), 1);
    }

    #[test]
    fn packet_carries_invoices_even_with_shared_names() {
        let invoices: Vec<Invoice> = (0..6)
            .map(|i| invoice("scan", vec![token(Category::Tax, i as f64)]))
            .collect();
        let packet = assembler()
            .create_train_and_test_packet(&invoices, 0.5, 11, false)
            .unwrap();
        assert_eq!(packet.train_invoices.len(), 3);
        assert_eq!(packet.test_invoices.len(), 3);

        fn values(side: &[Invoice]) -> Vec<f64> {
            side.iter()
                .flat_map(|i| i.tokens().map(|(_, _, t)| t.features["a"]))
                .collect()
        }
        let test_rows: Vec<f64> = packet.test.features.iter().map(|row| row[0]).collect();
        assert_eq!(values(&packet.test_invoices), test_rows);
        let train_rows: Vec<f64> = packet.train.features.iter().map(|row| row[0]).collect();
        assert_eq!(values(&packet.train_invoices), train_rows);
    }
}
