use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::error::{ExtractError, Result};
use crate::models::Invoice;

/// 单个 JSON 文件可以是一张发票或发票数组
#[derive(Deserialize)]
#[serde(untagged)]
enum InvoiceFile {
    Many(Vec<Invoice>),
    One(Invoice),
}

fn corpus_error(path: &Path, message: impl Into<String>) -> ExtractError {
    ExtractError::Corpus {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// 加载发票语料
///
/// 支持:
/// - `.json` 文件 (一张发票或发票数组)
/// - `.jsonl` 文件 (每行一张发票)
/// - 目录 (其中的 `.json` 文件按文件名排序后依次加载)
///
/// 缺少名称的发票以文件名 (数组中再加序号) 命名。
pub fn load_corpus(path: &Path) -> Result<Vec<Invoice>> {
    if !path.exists() {
        return Err(corpus_error(path, "path does not exist"));
    }

    let invoices = if path.is_dir() {
        load_directory(path)?
    } else {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => load_json_file(path)?,
            Some("jsonl") => load_jsonl_file(path)?,
            _ => return Err(corpus_error(path, "unsupported corpus file format")),
        }
    };

    tracing::info!(
        "Loaded {} invoices ({} tokens) from {}",
        invoices.len(),
        invoices.iter().map(Invoice::token_count).sum::<usize>(),
        path.display()
    );
    Ok(invoices)
}

fn load_directory(dir: &Path) -> Result<Vec<Invoice>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| corpus_error(dir, e.to_string()))? {
        let path = entry.map_err(|e| corpus_error(dir, e.to_string()))?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    let mut invoices = Vec::new();
    for file in files {
        invoices.extend(load_json_file(&file)?);
    }
    Ok(invoices)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("invoice")
        .to_string()
}

fn load_json_file(path: &Path) -> Result<Vec<Invoice>> {
    let content = fs::read_to_string(path).map_err(|e| corpus_error(path, e.to_string()))?;
    let parsed: InvoiceFile =
        serde_json::from_str(&content).map_err(|e| corpus_error(path, format!("invalid invoice json: {}", e)))?;

    let stem = file_stem(path);
    Ok(match parsed {
        InvoiceFile::One(mut invoice) => {
            if invoice.name.is_empty() {
                invoice.name = stem;
            }
            vec![invoice]
        }
        InvoiceFile::Many(invoices) => name_unnamed(invoices, &stem),
    })
}

fn load_jsonl_file(path: &Path) -> Result<Vec<Invoice>> {
    let file = fs::File::open(path).map_err(|e| corpus_error(path, e.to_string()))?;
    let mut invoices = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| corpus_error(path, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let invoice: Invoice = serde_json::from_str(&line)
            .map_err(|e| corpus_error(path, format!("line {}: {}", line_num + 1, e)))?;
        invoices.push(invoice);
    }
    Ok(name_unnamed(invoices, &file_stem(path)))
}

fn name_unnamed(mut invoices: Vec<Invoice>, stem: &str) -> Vec<Invoice> {
    for (idx, invoice) in invoices.iter_mut().enumerate() {
        if invoice.name.is_empty() {
            invoice.name = format!("{}#{}", stem, idx);
        }
    }
    invoices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use tempfile::TempDir;

    const SINGLE: &str = r#"{
        "pages": [{
            "width": 600, "height": 800,
            "tokens": [
                {"text": "INV-001", "category": "Invoice number", "features": {"x": 0.5}},
                {"text": "Thanks"}
            ]
        }]
    }"#;

    #[test]
    fn directory_is_loaded_in_name_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.json"), SINGLE).unwrap();
        fs::write(dir.path().join("a.json"), SINGLE).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let invoices = load_corpus(dir.path()).unwrap();
        let names: Vec<&str> = invoices.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let token = &invoices[0].pages[0].tokens[0];
        assert_eq!(token.category, Some(Category::InvoiceNumber));
        assert_eq!(token.features["x"], 0.5);
        assert_eq!(invoices[0].pages[0].tokens[1].category, None);
    }

    #[test]
    fn array_file_keeps_given_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, r#"[{"name": "first", "pages": []}, {"pages": []}]"#).unwrap();

        let invoices = load_corpus(&path).unwrap();
        assert_eq!(invoices[0].name, "first");
        assert_eq!(invoices[1].name, "corpus#1");
    }

    #[test]
    fn jsonl_reports_bad_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        fs::write(&path, "{\"name\": \"ok\"}\n\nnot json\n").unwrap();

        let err = load_corpus(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Corpus { .. }));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn missing_path_is_a_corpus_error() {
        let dir = TempDir::new().unwrap();
        let err = load_corpus(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ExtractError::Corpus { .. }));
    }
}
