// Document Parser & Section Tracker (component B, spec.md §4.2).
mod docx;
mod pdf;
mod section;
mod split;
mod text;

pub use section::sanitize_section;

use crate::models::DocumentKind;
use anyhow::{anyhow, Context, Result};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ParsedChoice {
    pub key: char,
    pub text: String,
    pub is_visually_marked: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedQuestion {
    pub index: usize,
    pub stem: String,
    pub choices: Vec<ParsedChoice>,
    pub correct_answer_key: String,
    pub section: String,
    /// true when exactly one choice carried a visual mark.
    pub style_detected: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    pub questions: Vec<ParsedQuestion>,
}

/// Bytes that identify a ZIP local file header / central directory, used to
/// sniff an upload whose extension lies about its container (SPEC_FULL §3).
pub fn sniff_is_zip(path: &Path) -> bool {
    read_header(path).map(|h| h.starts_with(b"PK\x03\x04") || h.starts_with(b"PK\x05\x06")).unwrap_or(false)
}

/// Legacy OLE compound-file header, the container format of pre-2007 `.doc`.
fn sniff_is_ole(path: &Path) -> bool {
    read_header(path).map(|h| h.starts_with(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1")).unwrap_or(false)
}

fn sniff_is_pdf(path: &Path) -> bool {
    read_header(path).map(|h| h.starts_with(b"%PDF-")).unwrap_or(false)
}

fn read_header(path: &Path) -> Option<[u8; 8]> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).ok()?;
    let mut header = [0u8; 8];
    let read = file.read(&mut header).ok()?;
    if read < header.len() {
        return None;
    }
    Some(header)
}

/// Extensions accepted by the upload handler (spec.md §6).
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "txt", "rtf", "odt"];

/// Upload size limit from spec.md §6.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Validates an upload the way the out-of-scope upload handler must before
/// enqueuing a job (spec.md §6): extension allow-list, a 50 MiB size cap, and
/// a magic-byte check that the container actually matches what the extension
/// claims. Returns the `DocumentKind` to record on the Quiz.
pub fn validate_upload(path: &Path, extension: &str) -> Result<DocumentKind> {
    let extension = extension.trim_start_matches('.').to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(anyhow!("unsupported upload extension: .{extension}"));
    }

    let size = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if size > MAX_UPLOAD_BYTES {
        return Err(anyhow!(
            "upload exceeds the {}-byte size limit ({size} bytes)",
            MAX_UPLOAD_BYTES
        ));
    }

    match extension.as_str() {
        "pdf" if !sniff_is_pdf(path) => {
            Err(anyhow!("file claims .pdf but its magic bytes don't match a PDF"))
        }
        "docx" if !sniff_is_zip(path) => {
            Err(anyhow!("file claims .docx but its magic bytes don't match a zip container"))
        }
        "doc" if !(sniff_is_zip(path) || sniff_is_ole(path)) => {
            Err(anyhow!("file claims .doc but its magic bytes match neither OLE nor zip"))
        }
        _ => Ok(DocumentKind::from_extension(&extension)),
    }
}

/// Parses `path` according to `kind`, falling back from docx-like to raw
/// text when the zip container can't be opened or yields zero questions —
/// spec.md §4.2's "if HTML extraction yields zero questions, fall back to
/// raw text extraction", generalized to unreadable containers too.
pub fn parse_document(path: &Path, kind: DocumentKind, section_default: &str) -> Result<ParsedDocument> {
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();

    let questions = match kind {
        DocumentKind::Pdf => {
            let raw_text = pdf::extract_text(path)?;
            split::extract_questions(&raw_text, section_default)
        }
        DocumentKind::DocxLike => match docx::extract_questions(path, section_default) {
            Ok(questions) if !questions.is_empty() => questions,
            _ => {
                let raw_text = text::read_as_text(path)?;
                split::extract_questions(&raw_text, section_default)
            }
        },
        DocumentKind::TextLike => {
            let raw_text = text::read_as_text(path)?;
            split::extract_questions(&raw_text, section_default)
        }
    };

    if questions.is_empty() {
        return Err(anyhow!("zero questions extracted from {}", path.display()));
    }

    Ok(ParsedDocument { title, questions })
}
