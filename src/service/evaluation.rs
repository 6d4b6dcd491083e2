use indexmap::IndexMap;
use rayon::prelude::*;

use crate::classifier::Model;
use crate::error::{ExtractError, Result};
use crate::features::FeatureProvider;
use crate::models::{Category, CategoryMetrics, ClassificationReport, Dataset, Invoice, InvoiceScore};
use crate::service::dataset::DatasetAssembler;

/// 逐类别统计预测与真实标签
///
/// 报告包含在预测或真实标签中出现过的类别 (按类别下标排序)。
/// 没有预测或没有真实样本时对应的 precision / recall 记为 0。
pub fn summarize(predicted: &[Category], truth: &[Category]) -> Result<ClassificationReport> {
    if predicted.len() != truth.len() {
        return Err(ExtractError::InvalidInput(format!(
            "{} predictions but {} ground-truth labels",
            predicted.len(),
            truth.len()
        )));
    }

    let mut true_positive = [0usize; Category::COUNT];
    let mut predicted_count = [0usize; Category::COUNT];
    let mut support = [0usize; Category::COUNT];
    for (&p, &t) in predicted.iter().zip(truth) {
        predicted_count[p.index()] += 1;
        support[t.index()] += 1;
        if p == t {
            true_positive[p.index()] += 1;
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let per_category: IndexMap<Category, CategoryMetrics> = Category::ALL
        .iter()
        .filter(|c| support[c.index()] > 0 || predicted_count[c.index()] > 0)
        .map(|&c| {
            let i = c.index();
            let precision = ratio(true_positive[i], predicted_count[i]);
            let recall = ratio(true_positive[i], support[i]);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            (
                c,
                CategoryMetrics {
                    precision,
                    recall,
                    f1,
                    support: support[i],
                },
            )
        })
        .collect();

    let total = truth.len();
    let correct: usize = true_positive.iter().sum();
    let labels = per_category.len().max(1) as f64;

    let mut macro_avg = CategoryMetrics {
        support: total,
        ..CategoryMetrics::default()
    };
    let mut weighted_avg = macro_avg;
    for m in per_category.values() {
        macro_avg.precision += m.precision / labels;
        macro_avg.recall += m.recall / labels;
        macro_avg.f1 += m.f1 / labels;

        let weight = ratio(m.support, total);
        weighted_avg.precision += m.precision * weight;
        weighted_avg.recall += m.recall * weight;
        weighted_avg.f1 += m.f1 * weight;
    }

    Ok(ClassificationReport {
        per_category,
        accuracy: ratio(correct, total),
        macro_avg,
        weighted_avg,
        total,
    })
}

/// 评估报告生成器
pub struct Evaluator<'a, P> {
    assembler: &'a DatasetAssembler<P>,
}

impl<'a, P: FeatureProvider> Evaluator<'a, P> {
    pub fn new(assembler: &'a DatasetAssembler<P>) -> Self {
        Self { assembler }
    }

    /// 在已构建的样本集上生成分类报告
    pub fn evaluate(&self, dataset: &Dataset, model: &Model) -> Result<ClassificationReport> {
        model.ensure_features(&dataset.feature_names)?;
        let predicted = model.predict_categories(&dataset.features)?;
        summarize(&predicted, &dataset.categories)
    }

    /// 单张发票的 token 级准确率，无 token 时返回 `None`
    pub fn score_invoice(&self, invoice: &Invoice, model: &Model) -> Result<Option<f64>> {
        let (rows, tokens) = self.assembler.featurize(invoice)?;
        if tokens.is_empty() {
            return Ok(None);
        }
        let truth = tokens
            .iter()
            .map(|t| {
                t.token.category.ok_or_else(|| ExtractError::MissingLabel {
                    document: t.document.clone(),
                    page: t.page,
                    position: t.position,
                })
            })
            .collect::<Result<Vec<Category>>>()?;

        let predicted = model.predict_categories(&rows)?;
        let correct = predicted.iter().zip(&truth).filter(|(p, t)| p == t).count();
        Ok(Some(correct as f64 / truth.len() as f64))
    }

    /// 按准确率升序排列发票 (最差在前，并列保持语料顺序)
    ///
    /// 失败或没有 token 的发票记日志后跳过，其余发票照常排名。
    pub fn rank_by_accuracy(&self, invoices: &[Invoice], model: &Model) -> Result<Vec<InvoiceScore>> {
        model.ensure_features(self.assembler.features().names())?;

        let scored: Vec<(String, Result<Option<f64>>)> = invoices
            .par_iter()
            .map(|invoice| (invoice.name.clone(), self.score_invoice(invoice, model)))
            .collect();

        let mut ranking = Vec::with_capacity(scored.len());
        for (document_name, result) in scored {
            match result {
                Ok(Some(overall_accuracy)) => ranking.push(InvoiceScore {
                    document_name,
                    overall_accuracy,
                }),
                Ok(None) => tracing::debug!("Invoice {} has no tokens, left out of ranking", document_name),
                Err(e) => tracing::warn!("Could not score invoice {}: {}", document_name, e),
            }
        }

        // sort_by 是稳定排序
        ranking.sort_by(|a, b| a.overall_accuracy.total_cmp(&b.overall_accuracy));
        tracing::info!("Ranked {} of {} invoices by accuracy", ranking.len(), invoices.len());
        Ok(ranking)
    }
}
