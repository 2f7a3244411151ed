// Block segmentation + stem/choice extraction shared by the PDF and
// plain-text pipelines (spec.md §4.2 "Splitting" / "Question extraction").
use super::section::{heading_occurrences, SectionTracker};
use super::{ParsedChoice, ParsedQuestion};
use regex::Regex;
use std::sync::LazyLock;

const MIN_BLOCK_LEN: usize = 10;

static BLOCK_BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:\(CLO\s*\d\.\d\)|C\s?âu\s*\d+\s*[:.]|^\s*\d+[.)])").unwrap()
});

static LEADING_DECORATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\(CLO\s*\d\.\d\)|(?:Chương|Bài|CLO)\s*[\d.]*\s*[:.]?|C\s?âu\s*\d+\s*[:.]?|\d+\s*[.)])\s*").unwrap()
});

static CHOICE_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\sA\.").unwrap());

static CHOICE_SCAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)([A-Fa-f])\.\s*(.*?)(?=(?:\s[A-Fa-f]\.)|\z)").unwrap()
});

/// Splits `text` into question blocks and extracts a `ParsedQuestion` from
/// each, carrying the sticky section through in document order.
pub fn extract_questions(text: &str, section_default: &str) -> Vec<ParsedQuestion> {
    let occurrences = heading_occurrences(text, section_default);
    let mut tracker = SectionTracker::new(&occurrences, section_default);
    let mut index = 0usize;
    let mut questions = Vec::new();

    for (start, block) in split_blocks(text) {
        if block.trim().len() < MIN_BLOCK_LEN {
            continue;
        }
        let section = tracker.advance_to(start);
        if let Some((stem, choices)) = extract_stem_and_choices(&block) {
            if choices.len() < 2 || choices.len() > 6 || stem.is_empty() {
                continue;
            }
            if !has_contiguous_keys(&choices) {
                continue;
            }
            index += 1;
            questions.push(ParsedQuestion {
                index,
                stem,
                choices,
                correct_answer_key: String::new(),
                section,
                style_detected: false,
            });
        }
    }
    questions
}

fn split_blocks(text: &str) -> Vec<(usize, String)> {
    let starts: Vec<usize> = BLOCK_BOUNDARY_RE.find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return Vec::new();
    }
    let mut blocks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        if end > start {
            blocks.push((start, text[start..end].to_string()));
        }
    }
    blocks
}

/// Finds the " A." anchor, cleans the stem, and scans choices from the
/// anchor forward. Returns `None` when no anchor is present in the block.
fn extract_stem_and_choices(block: &str) -> Option<(String, Vec<ParsedChoice>)> {
    let anchor = CHOICE_ANCHOR_RE.find(block)?;
    let stem_raw = &block[..anchor.start()];
    let choices_text = &block[anchor.start() + 1..]; // drop the leading space, keep "A. ..."

    let stem = clean_stem(stem_raw);
    let choices = choices_from_text(choices_text);
    Some((stem, choices))
}

pub fn clean_stem(raw: &str) -> String {
    let decorated = LEADING_DECORATION_RE.replace(raw, "");
    collapse_whitespace(&decorated)
}

pub fn choices_from_text(text: &str) -> Vec<ParsedChoice> {
    CHOICE_SCAN_RE
        .captures_iter(text)
        .map(|caps| {
            let key = caps[1].chars().next().unwrap().to_ascii_uppercase();
            let choice_text = collapse_whitespace(&caps[2]);
            ParsedChoice {
                key,
                text: choice_text,
                is_visually_marked: false,
            }
        })
        .collect()
}

fn has_contiguous_keys(choices: &[ParsedChoice]) -> bool {
    choices
        .iter()
        .enumerate()
        .all(|(i, c)| c.key as u8 == b'A' + i as u8)
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
