// Sticky-section rule and section sanitizer (spec.md §4.2, testable laws §8).
use regex::Regex;
use std::sync::LazyLock;

const MARKERS: &[&str] = &[
    "CHƯƠNG", "BÀI", "PHẦN", "MỤC", "CLO", "CHAPTER", "SECTION", "PART",
];

static LEADING_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:Chương|Bài|Phần|Mục|CLO|Chapter|Section|Part)\s*[\d.]+").unwrap()
});

static ROMAN_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[IVXLCDM]{1,5}\b").unwrap());

static PAREN_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\((?:CLO|Chương|Bài)\s*[\d.]*\)").unwrap());

static MAJOR_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\p{L}\s]*?)\s*([0-9]+)").unwrap());

/// A `(byte_offset, sanitized_section)` change-point: `currentSection`
/// becomes `sanitized_section` as soon as the scan reaches `byte_offset`.
pub type HeadingOccurrence = (usize, String);

/// Scans the whole document once for heading occurrences — more robust than
/// checking only a single block's leading text, since block boundaries
/// (driven by question markers) and heading lines don't always align to the
/// same position. A heading at byte offset `p` is sticky for every question
/// whose block starts at or after `p`, until the next occurrence.
pub fn heading_occurrences(text: &str, default: &str) -> Vec<HeadingOccurrence> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for m in LEADING_HEADING_RE.find_iter(text) {
        found.push((m.start(), sanitize_section(m.as_str(), default)));
    }
    for m in ROMAN_HEADING_RE.find_iter(text) {
        found.push((m.start(), sanitize_section(m.as_str(), default)));
    }
    for m in PAREN_MARKER_RE.find_iter(text) {
        let inner = m.as_str().trim_start_matches('(').trim_end_matches(')');
        found.push((m.start(), sanitize_section(inner, default)));
    }

    found.sort_by_key(|(pos, _)| *pos);
    found
}

/// Walks `occurrences` in step with monotonically increasing block start
/// positions, returning the section sticky at `pos`.
pub struct SectionTracker<'a> {
    occurrences: &'a [HeadingOccurrence],
    next_index: usize,
    current: String,
}

impl<'a> SectionTracker<'a> {
    pub fn new(occurrences: &'a [HeadingOccurrence], default: impl Into<String>) -> Self {
        Self {
            occurrences,
            next_index: 0,
            current: default.into(),
        }
    }

    pub fn advance_to(&mut self, pos: usize) -> String {
        while self.next_index < self.occurrences.len() && self.occurrences[self.next_index].0 <= pos {
            self.current = self.occurrences[self.next_index].1.clone();
            self.next_index += 1;
        }
        self.current.clone()
    }
}

/// Section sanitizer: trim, uppercase, collapse duplicated prefixes, extract
/// the major prefix (letters + first integer), normalize spacing, and
/// substitute the default when the result is empty.
pub fn sanitize_section(raw: &str, default: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() {
        return default.to_string();
    }
    let collapsed = collapse_duplicated_prefix(&upper);

    if let Some(caps) = MAJOR_PREFIX_RE.captures(&collapsed) {
        let letters = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let digits = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if !letters.is_empty() {
            return format!("{letters} {digits}");
        }
        if !digits.is_empty() {
            return digits.to_string();
        }
    }

    let letters_only: String = collapsed
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    let letters_only = letters_only.trim();
    if letters_only.is_empty() {
        default.to_string()
    } else {
        letters_only.to_string()
    }
}

/// Collapses duplicated markers such as "CLCLO" -> "CLO" or "CLO CLO" -> "CLO".
fn collapse_duplicated_prefix(upper: &str) -> String {
    for marker in MARKERS {
        let doubled = format!("{marker}{marker}");
        if let Some(rest) = upper.strip_prefix(&doubled) {
            return format!("{marker}{rest}");
        }
        if let Some(rest) = upper.strip_prefix(marker) {
            let rest_trimmed = rest.trim_start();
            if let Some(rest2) = rest_trimmed.strip_prefix(marker) {
                return format!("{marker}{rest2}");
            }
        }
        // Overlapping partial-prefix duplication such as "CLCLO" (a strict
        // prefix of the marker immediately followed by the marker itself).
        for split in 1..marker.len() {
            if !marker.is_char_boundary(split) {
                continue;
            }
            let partial = &marker[..split];
            let glued = format!("{partial}{marker}");
            if let Some(rest) = upper.strip_prefix(&glued) {
                return format!("{marker}{rest}");
            }
        }
    }
    upper.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_major_dotted_number() {
        assert_eq!(sanitize_section("CLO 1.2.3", "Nội dung chung"), "CLO 1");
    }

    #[test]
    fn test_sanitize_collapses_duplicated_marker() {
        assert_eq!(sanitize_section("clclo 2", "Nội dung chung"), "CLO 2");
    }

    #[test]
    fn test_sanitize_normalizes_spacing() {
        assert_eq!(sanitize_section("CHƯƠNG2", "Nội dung chung"), "CHƯƠNG 2");
    }

    #[test]
    fn test_sanitize_blank_falls_back_to_default() {
        assert_eq!(sanitize_section("   ", "Nội dung chung"), "Nội dung chung");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = sanitize_section("CLO 1.2.3", "Nội dung chung");
        let twice = sanitize_section(&once, "Nội dung chung");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sticky_section_persists_until_next_heading() {
        let text = "Chương 1 giới thiệu\nCâu 1: stray\nCâu 2: another\nBài 2.1 tiếp theo\nCâu 3: yet another";
        let occurrences = heading_occurrences(text, "Nội dung chung");
        let mut tracker = SectionTracker::new(&occurrences, "Nội dung chung");
        let q1_pos = text.find("Câu 1").unwrap();
        let q2_pos = text.find("Câu 2").unwrap();
        let q3_pos = text.find("Câu 3").unwrap();
        assert_eq!(tracker.advance_to(q1_pos), "CHƯƠNG 1");
        assert_eq!(tracker.advance_to(q2_pos), "CHƯƠNG 1");
        assert_eq!(tracker.advance_to(q3_pos), "BÀI 2");
    }

    #[test]
    fn test_paren_marker_anywhere_in_block_updates_section() {
        let text = "Câu 1: some question (CLO 2.1) continues";
        let occurrences = heading_occurrences(text, "Nội dung chung");
        let mut tracker = SectionTracker::new(&occurrences, "Nội dung chung");
        assert_eq!(tracker.advance_to(text.len()), "CLO 2");
    }
}
