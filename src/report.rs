use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use crate::error::{ExtractError, Result};
use crate::models::{FieldAssignments, InvoiceScore};

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| ExtractError::persistence(path.display().to_string(), e))
        }
        _ => Ok(()),
    }
}

/// 以 JSON 数组写出发票准确率排名 (`[{documentName, overallAccuracy}]`)
pub fn write_scores_json(scores: &[InvoiceScore], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let name = path.display().to_string();
    let file = File::create(path).map_err(|e| ExtractError::persistence(&name, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, scores).map_err(|e| ExtractError::persistence(&name, e))?;
    writer.flush().map_err(|e| ExtractError::persistence(&name, e))?;
    tracing::info!("Wrote {} invoice scores to {}", scores.len(), name);
    Ok(())
}

/// 导出排名到 CSV
pub fn write_scores_csv(scores: &[InvoiceScore], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let name = path.display().to_string();
    let mut writer = csv::Writer::from_path(path).map_err(|e| ExtractError::persistence(&name, e))?;

    writer
        .write_record(["rank", "documentName", "overallAccuracy"])
        .map_err(|e| ExtractError::persistence(&name, e))?;
    for (rank, score) in scores.iter().enumerate() {
        writer
            .write_record([
                (rank + 1).to_string(),
                score.document_name.clone(),
                score.overall_accuracy.to_string(),
            ])
            .map_err(|e| ExtractError::persistence(&name, e))?;
    }

    writer.flush().map_err(|e| ExtractError::persistence(&name, e))?;
    tracing::info!("Exported {} invoice scores to {}", scores.len(), name);
    Ok(())
}

/// 最差的前 N 张发票 (输入应已按准确率升序排列)
pub fn worst_performers(scores: &[InvoiceScore], top_n: usize) -> String {
    let shown = top_n.min(scores.len());
    let mut out = format!("Worst {} of {} invoices by token accuracy:\n", shown, scores.len());
    for (rank, score) in scores.iter().take(shown).enumerate() {
        let _ = writeln!(
            out,
            "{:>4}. {:<40} {:>6.2}%",
            rank + 1,
            score.document_name,
            score.overall_accuracy * 100.0
        );
    }
    out
}

/// 渲染一张发票已命中的业务字段 ("Others" 与未命中类别不输出)
pub fn render_assignments(fields: &FieldAssignments) -> String {
    let mut out = format!("{}:\n", fields.document);
    let mut any = false;
    for (category, assignment) in fields.business_fields() {
        any = true;
        let _ = writeln!(
            out,
            "  {:<24} {:<32} ({:.3})",
            category.name(),
            assignment.text().unwrap_or_default(),
            assignment.confidence
        );
    }
    if !any {
        out.push_str("  (no fields found)\n");
    }
    out
}
