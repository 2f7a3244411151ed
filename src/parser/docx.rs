// DOCX OOXML parsing and visual-mark detection (component B, spec.md §4.2 /
// §4.4's "visual mark" precedence rule). Walks word/document.xml run by run,
// since a style map (bold/italic/underline/strike/color/highlight) only
// survives at the run level — converting to HTML first and re-parsing would
// lose it.
use super::section::{heading_occurrences, SectionTracker};
use super::split::{clean_stem, collapse_whitespace};
use super::{ParsedChoice, ParsedQuestion};
use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::io::Read as _;

static QUESTION_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\(CLO\s*\d\.\d\)|C\s?âu\s*\d+\s*[:.]|\d+\s*[.)])").unwrap()
});

static CHOICE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*([A-F])\s*[.)]\s*(.*)$").unwrap());

struct DocxParagraph {
    text: String,
    marked: bool,
}

/// Extracts questions directly from a `.docx` zip container. Returns an
/// error (or an empty vec, handled identically by the caller) when the file
/// isn't a readable zip/OOXML document, triggering the raw-text fallback.
pub fn extract_questions(path: &Path, section_default: &str) -> Result<Vec<ParsedQuestion>> {
    let paragraphs = extract_paragraphs(path)?;
    Ok(questions_from_paragraphs(&paragraphs, section_default))
}

fn extract_paragraphs(path: &Path) -> Result<Vec<DocxParagraph>> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("docx is not a valid zip container")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("docx missing word/document.xml")?
        .read_to_string(&mut xml)
        .context("read word/document.xml")?;

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current_text = String::new();
    let mut current_marked = false;
    let mut run_marked = false;
    let mut in_rpr = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                let name = tag.name();
                let local = String::from_utf8_lossy(name.as_ref()).into_owned();
                match local.as_str() {
                    "w:p" => {
                        current_text.clear();
                        current_marked = false;
                    }
                    "w:rPr" => in_rpr = true,
                    "w:b" | "w:i" | "w:u" | "w:strike" | "w:color" | "w:highlight" if in_rpr => {
                        if !is_explicitly_off(&tag) {
                            run_marked = true;
                        }
                    }
                    "w:t" => in_text = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(tag)) => {
                let name = tag.name();
                let local = String::from_utf8_lossy(name.as_ref()).into_owned();
                if in_rpr && matches!(local.as_str(), "w:b" | "w:i" | "w:u" | "w:strike" | "w:color" | "w:highlight") && !is_explicitly_off(&tag) {
                    run_marked = true;
                }
                if local == "w:tab" {
                    current_text.push(' ');
                }
                if local == "w:br" {
                    current_text.push('\n');
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    let decoded = e.unescape().unwrap_or_default();
                    current_text.push_str(&decoded);
                }
            }
            Ok(Event::End(tag)) => {
                let name = tag.name();
                let local = String::from_utf8_lossy(name.as_ref()).into_owned();
                match local.as_str() {
                    "w:rPr" => in_rpr = false,
                    "w:r" => {
                        if run_marked {
                            current_marked = true;
                        }
                        run_marked = false;
                    }
                    "w:t" => in_text = false,
                    "w:p" => {
                        let text = current_text.clone();
                        let marked = current_marked || text.contains('✓');
                        paragraphs.push(DocxParagraph { text, marked });
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

/// `w:val="0"`/`"none"` turns a toggle property off; anything else (including
/// a bare self-closing tag, which defaults to "on") counts as a mark.
fn is_explicitly_off(tag: &quick_xml::events::BytesStart) -> bool {
    tag.attributes().flatten().any(|attr| {
        attr.key.as_ref() == b"w:val"
            && matches!(attr.value.as_ref(), b"0" | b"none" | b"false")
    })
}

fn questions_from_paragraphs(paragraphs: &[DocxParagraph], section_default: &str) -> Vec<ParsedQuestion> {
    let joined: Vec<&str> = paragraphs.iter().map(|p| p.text.as_str()).collect();
    let full_text = joined.join("\n");
    let occurrences = heading_occurrences(&full_text, section_default);
    let mut tracker = SectionTracker::new(&occurrences, section_default);

    let mut offsets = Vec::with_capacity(paragraphs.len());
    let mut cursor = 0usize;
    for p in paragraphs {
        offsets.push(cursor);
        cursor += p.text.len() + 1;
    }

    let starts: Vec<usize> = paragraphs
        .iter()
        .enumerate()
        .filter(|(_, p)| QUESTION_MARKER_RE.is_match(&p.text))
        .map(|(i, _)| i)
        .collect();

    let mut index = 0usize;
    let mut questions = Vec::new();

    for (block_i, &start) in starts.iter().enumerate() {
        let end = starts.get(block_i + 1).copied().unwrap_or(paragraphs.len());
        let block = &paragraphs[start..end];
        if block.is_empty() {
            continue;
        }
        let section = tracker.advance_to(offsets[start]);

        let stem = clean_stem(&block[0].text);
        if stem.is_empty() {
            continue;
        }

        let mut choices = Vec::new();
        for p in &block[1..] {
            let Some(caps) = CHOICE_MARKER_RE.captures(p.text.trim()) else {
                continue;
            };
            let key = caps[1].chars().next().unwrap().to_ascii_uppercase();
            let text = collapse_whitespace(&caps[2]);
            if text.is_empty() {
                continue;
            }
            choices.push(ParsedChoice {
                key,
                text,
                is_visually_marked: p.marked,
            });
        }

        if choices.len() < 2 || choices.len() > 6 {
            continue;
        }
        if !choices.iter().enumerate().all(|(i, c)| c.key as u8 == b'A' + i as u8) {
            continue;
        }

        let marked_keys: Vec<char> = choices.iter().filter(|c| c.is_visually_marked).map(|c| c.key).collect();
        let style_detected = marked_keys.len() == 1;
        let correct_answer_key = if style_detected {
            marked_keys[0].to_string()
        } else {
            String::new()
        };

        index += 1;
        questions.push(ParsedQuestion {
            index,
            stem,
            choices,
            correct_answer_key,
            section,
            style_detected,
        });
    }

    questions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_questions_from_paragraphs_detects_single_visual_mark() {
        let paragraphs = vec![
            DocxParagraph { text: "Chương 1 mở đầu".into(), marked: false },
            DocxParagraph { text: "Câu 1: What is 2+2?".into(), marked: false },
            DocxParagraph { text: "A. 3".into(), marked: false },
            DocxParagraph { text: "B. 4".into(), marked: true },
            DocxParagraph { text: "C. 5".into(), marked: false },
        ];
        let questions = questions_from_paragraphs(&paragraphs, "Nội dung chung");
        assert_eq!(questions.len(), 1);
        assert!(questions[0].style_detected);
        assert_eq!(questions[0].correct_answer_key, "B");
        assert_eq!(questions[0].section, "CHƯƠNG 1");
    }

    #[test]
    fn test_questions_from_paragraphs_no_mark_leaves_key_blank() {
        let paragraphs = vec![
            DocxParagraph { text: "Câu 1: Unmarked question".into(), marked: false },
            DocxParagraph { text: "A. one".into(), marked: false },
            DocxParagraph { text: "B. two".into(), marked: false },
        ];
        let questions = questions_from_paragraphs(&paragraphs, "Nội dung chung");
        assert_eq!(questions.len(), 1);
        assert!(!questions[0].style_detected);
        assert_eq!(questions[0].correct_answer_key, "");
    }

    #[test]
    fn test_questions_from_paragraphs_multiple_marks_not_style_detected() {
        let paragraphs = vec![
            DocxParagraph { text: "Câu 1: Ambiguous marking".into(), marked: false },
            DocxParagraph { text: "A. one".into(), marked: true },
            DocxParagraph { text: "B. two".into(), marked: true },
        ];
        let questions = questions_from_paragraphs(&paragraphs, "Nội dung chung");
        assert_eq!(questions.len(), 1);
        assert!(!questions[0].style_detected);
    }

    #[test]
    fn test_checkmark_glyph_counts_as_a_mark_without_run_properties() {
        let paragraphs = vec![
            DocxParagraph { text: "Câu 1: Glyph marked".into(), marked: false },
            DocxParagraph { text: "A. one".into(), marked: false },
            DocxParagraph { text: "B. two ✓".into(), marked: true },
        ];
        let questions = questions_from_paragraphs(&paragraphs, "Nội dung chung");
        assert_eq!(questions[0].correct_answer_key, "B");
    }

    fn docx_fixture(document_xml: &str) -> tempfile::TempPath {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let zip_file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(zip_file);
        zip.start_file("word/document.xml", zip::write::FileOptions::default()).unwrap();
        use std::io::Write;
        zip.write_all(document_xml.as_bytes()).unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_italic_run_counts_as_a_visual_mark() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="ns"><w:body>
<w:p><w:r><w:t>Câu 1: Italic marked?</w:t></w:r></w:p>
<w:p><w:r><w:t>A. one</w:t></w:r></w:p>
<w:p><w:r><w:rPr><w:i/></w:rPr><w:t>B. two</w:t></w:r></w:p>
</w:body></w:document>"#;
        let path = docx_fixture(xml);
        let questions = extract_questions(&path, "Nội dung chung").unwrap();
        assert_eq!(questions.len(), 1);
        assert!(questions[0].style_detected);
        assert_eq!(questions[0].correct_answer_key, "B");
    }
}
