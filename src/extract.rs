//! PDF text extraction.
//!
//! Turns an uploaded PDF byte stream into page-delimited plain text. Parsing
//! is CPU-bound, so it runs on the blocking pool. Extraction failure is fatal
//! for the ingestion job and is never retried.

use std::path::Path;

use crate::error::PipelineError;

/// Plain text pulled out of one uploaded document.
///
/// `pages[i]` holds the whitespace-normalized text of page `i + 1`;
/// `full_text` is all pages joined by single spaces, trimmed.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: String,
    pub pages: Vec<String>,
    pub full_text: String,
}

/// Extract page-delimited text from PDF bytes.
///
/// The title defaults to the original filename without its extension.
pub async fn extract_pdf(
    bytes: Vec<u8>,
    original_name: &str,
) -> Result<ExtractedDocument, PipelineError> {
    let name = original_name.to_string();
    tokio::task::spawn_blocking(move || extract_pdf_sync(&bytes, &name))
        .await
        .map_err(|e| PipelineError::Extraction(format!("extraction task failed: {}", e)))?
}

fn extract_pdf_sync(bytes: &[u8], original_name: &str) -> Result<ExtractedDocument, PipelineError> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;

    let pages: Vec<String> = raw_pages.iter().map(|p| join_text_runs(p)).collect();

    let full_text = pages
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();

    Ok(ExtractedDocument {
        title: title_from_filename(original_name),
        pages,
        full_text,
    })
}

/// Collapse the extractor's text runs into space-separated prose.
fn join_text_runs(page: &str) -> String {
    page.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filename sans extension, used as the default document title.
pub fn title_from_filename(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
