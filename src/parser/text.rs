// Plain-text pipeline and docx-like fallback path (spec.md §4.2).
use anyhow::{Context, Result};
use encoding_rs::Encoding;
use std::path::Path;

/// Labels tried in order when the bytes aren't valid UTF-8 — legacy single-byte
/// Vietnamese encodings first, since this pipeline's documents are
/// predominantly Vietnamese-language quiz banks, then common CJK/Latin
/// fallbacks. Mirrors the teacher's `read_text`/`decode_with_labels` label
/// cascade in `services/doc2md.rs`.
const FALLBACK_LABELS: &[&str] = &["windows-1258", "windows-1252", "gb18030"];

pub fn read_as_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let raw = decode_bytes(&bytes);
    Ok(normalize_line_endings(&raw))
}

fn decode_bytes(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    for label in FALLBACK_LABELS {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, _, had_errors) = encoding.decode(bytes);
            if !had_errors {
                return decoded.into_owned();
            }
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn normalize_line_endings(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_as_text_normalizes_crlf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"line one\r\nline two\r").unwrap();
        let text = read_as_text(file.path()).unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[test]
    fn test_decode_bytes_falls_back_for_non_utf8_input() {
        let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode("café");
        let decoded = decode_bytes(&encoded);
        assert!(decoded.contains("caf"));
    }
}
