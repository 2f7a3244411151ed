// PDF text extraction (component B, spec.md §4.2, "pdf" pipeline).
use anyhow::{Context, Result};
use std::path::Path;

pub fn extract_text(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .with_context(|| format!("extract text from pdf {}", path.display()))
}
