use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

use super::SourceItem;
use crate::error::IngestionError;
use crate::traits::TextExtractor;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Plain text, markdown, JSON, CSV, PDF and DOCX.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, item: &SourceItem) -> Result<String, IngestionError> {
        let name = item.metadata.file_name.as_str();
        match item.metadata.mime_type.as_str() {
            "text/plain" | "text/markdown" => Ok(String::from_utf8_lossy(&item.bytes).into_owned()),
            "application/json" => json_to_text(name, &item.bytes),
            "text/csv" => Ok(csv_to_text(&String::from_utf8_lossy(&item.bytes))),
            "application/pdf" => pdf_to_text(name, &item.bytes),
            DOCX_MIME => docx_lite::extract_text_from_bytes(&item.bytes)
                .map_err(|e| extraction(name, e.to_string())),
            other => Err(IngestionError::UnsupportedFormat { name: name.to_string(), mime_type: other.to_string() }),
        }
    }
}

fn extraction(name: &str, reason: String) -> IngestionError {
    IngestionError::Extraction { name: name.to_string(), reason }
}

fn pdf_to_text(name: &str, bytes: &[u8]) -> Result<String, IngestionError> {
    // pdf-extract panics on some malformed inputs.
    let pages = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes)))
        .map_err(|_| extraction(name, "PDF parser panicked".to_string()))?
        .map_err(|e| extraction(name, format!("{e:?}")))?;
    Ok(pages.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n\n"))
}

fn json_to_text(name: &str, bytes: &[u8]) -> Result<String, IngestionError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| extraction(name, e.to_string()))?;
    let mut out = String::new();
    flatten_json(&value, "", &mut out);
    Ok(out)
}

fn flatten_json(value: &Value, indent: &str, out: &mut String) {
    let nested = format!("{indent}  ");
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if v.is_object() || v.is_array() {
                    out.push_str(&format!("{indent}{key}:\n"));
                    flatten_json(v, &nested, out);
                } else {
                    out.push_str(&format!("{indent}{key}: {}\n", scalar(v)));
                }
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                out.push_str(&format!("{indent}Item {}:\n", i + 1));
                flatten_json(v, &nested, out);
            }
        }
        other => out.push_str(&format!("{indent}{}\n", scalar(other))),
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One line per row of `header: value` pairs. Quoted fields may hold commas,
/// doubled quotes and line breaks; a line break inside a field becomes a space.
fn csv_to_text(raw: &str) -> String {
    let mut rows = parse_csv(raw).into_iter().filter(|r| r.iter().any(|f| !f.is_empty()));
    let Some(headers) = rows.next() else {
        return String::new();
    };
    let mut out = String::new();
    for fields in rows {
        let row: Vec<String> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_empty())
            .map(|(i, f)| match headers.get(i) {
                Some(h) if !h.is_empty() => format!("{h}: {f}"),
                _ => f.clone(),
            })
            .collect();
        out.push_str(&row.join("; "));
        out.push('\n');
    }
    out
}

fn parse_csv(raw: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = raw.chars().peekable();
    let finish_field = |current: &mut String, fields: &mut Vec<String>| {
        let field = std::mem::take(current);
        fields.push(field.split_whitespace().collect::<Vec<_>>().join(" "));
    };
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => finish_field(&mut current, &mut fields),
            '\r' if !quoted => {}
            '\n' if !quoted => {
                finish_field(&mut current, &mut fields);
                rows.push(std::mem::take(&mut fields));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !fields.is_empty() {
        finish_field(&mut current, &mut fields);
        rows.push(fields);
    }
    rows
}
