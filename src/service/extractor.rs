use rayon::prelude::*;

use crate::classifier::{Model, Predictions};
use crate::error::Result;
use crate::features::FeatureProvider;
use crate::models::{FieldAssignments, Invoice, LocatedToken};
use crate::service::dataset::DatasetAssembler;

/// 字段抽取器: 把 token 级预测归约为每个类别一个最佳 token
pub struct FieldExtractor<'a, P> {
    assembler: &'a DatasetAssembler<P>,
}

impl<'a, P: FeatureProvider> FieldExtractor<'a, P> {
    pub fn new(assembler: &'a DatasetAssembler<P>) -> Self {
        Self { assembler }
    }

    /// 对单张发票做字段抽取
    ///
    /// 使用全部 token (不做 "Others" 抽样)，整批只调用一次模型预测。
    pub fn extract_fields(&self, invoice: &Invoice, model: &Model) -> Result<FieldAssignments> {
        model.ensure_features(self.assembler.features().names())?;

        let (rows, tokens) = self.assembler.featurize(invoice)?;
        if tokens.is_empty() {
            tracing::debug!("Invoice {} has no tokens, nothing to extract", invoice.name);
            return Ok(FieldAssignments::empty(&invoice.name));
        }

        let predictions = model.predict(&rows)?;
        let assignments = reduce_predictions(&invoice.name, &tokens, &predictions);
        tracing::debug!(
            "Invoice {}: {} tokens, {} business fields assigned",
            invoice.name,
            tokens.len(),
            assignments.assigned_count()
        );
        Ok(assignments)
    }

    /// 批量抽取，单张发票失败不影响其他发票
    pub fn extract_batch(&self, invoices: &[Invoice], model: &Model) -> Vec<(String, Result<FieldAssignments>)> {
        let results: Vec<(String, Result<FieldAssignments>)> = invoices
            .par_iter()
            .map(|invoice| (invoice.name.clone(), self.extract_fields(invoice, model)))
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        for (name, result) in &results {
            if let Err(e) = result {
                tracing::warn!("Field extraction failed for {}: {}", name, e);
            }
        }
        tracing::info!(
            "Extracted fields for {} invoices ({} failed)",
            results.len() - failed,
            failed
        );
        results
    }
}

/// 按遍历顺序归约预测: 置信度严格更大才替换，并列时先出现者保留
pub fn reduce_predictions(document: &str, tokens: &[LocatedToken], predictions: &Predictions) -> FieldAssignments {
    let mut assignments = FieldAssignments::empty(document);
    for ((token, &category), &confidence) in tokens
        .iter()
        .zip(&predictions.categories)
        .zip(&predictions.confidences)
    {
        assignments.offer(category, token, confidence);
    }
    assignments
}
