//! Boilerplate trimming (tier-2 pre-step, tier-3 fallback input).
//!
//! Three passes over canonical text:
//!
//! 1. collapse runs of spaces/tabs to single spaces (paragraph breaks kept),
//! 2. drop lines matching the boilerplate patterns, plus lines that repeat
//!    at ≥ 3 page boundaries (running headers/footers),
//! 3. drop duplicate adjacent paragraphs.
//!
//! Removal is deliberately conservative: only the fixed pattern list and
//! lines proven repetitive by position are touched, so unique content is
//! never dropped. Page markers (`[Page K]`) always survive.
//!
//! The whole operation is idempotent: `trim(trim(x)) == trim(x)`.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn boilerplate_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^(table of contents|contents|index)$",
            r"(?i)^page \d+( of \d+)?$",
            r"^\d{1,4}$",
            r"(?i)^(header|footer|copyright|all rights reserved)\b.*$",
            r"^[-=_*]{5,}$",
            r"^https?://\S+$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

fn page_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^\[Page \d+\]$").expect("static pattern"))
}

/// Remove boilerplate and redundant whitespace from canonical text.
///
/// The underlying pass is applied until the text stops changing, so the
/// operation as a whole is a fixpoint: `trim(trim(x)) == trim(x)` holds
/// even when removing one header exposes another repeated line.
pub fn trim_boilerplate(text: &str) -> String {
    let mut current = trim_pass(text);
    for _ in 0..8 {
        let next = trim_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn trim_pass(text: &str) -> String {
    // Pass 1: per-line whitespace collapse, before pattern matching so a
    // line like "Page 1  of 12" is recognized on the first run.
    let lines: Vec<String> = text
        .lines()
        .map(|line| collapse_spaces(line.trim_end()))
        .collect();

    let repeated = repeated_boundary_lines(&lines);

    // Pass 2: drop boilerplate lines.
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for line in &lines {
        if page_marker().is_match(line) {
            kept.push(line);
            continue;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if boilerplate_patterns().iter().any(|p| p.is_match(trimmed)) {
                continue;
            }
            if repeated.contains_key(trimmed) {
                continue;
            }
        }
        kept.push(line);
    }

    // Pass 3: squeeze blank runs to one paragraph break, then drop
    // duplicate adjacent paragraphs.
    let joined = kept.join("\n");
    let paragraphs = split_paragraphs(&joined);
    let mut out: Vec<&str> = Vec::with_capacity(paragraphs.len());
    for para in paragraphs {
        if out.last().map(|p| *p == para).unwrap_or(false) {
            continue;
        }
        out.push(para);
    }

    out.join("\n\n").trim().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

/// Lines adjacent to a page marker that occur at three or more page
/// boundaries: running headers and footers.
fn repeated_boundary_lines(lines: &[String]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        if !page_marker().is_match(line) {
            continue;
        }
        // First non-blank line after the marker (header) and before it (footer).
        if let Some(after) = lines[i + 1..].iter().find(|l| !l.trim().is_empty()) {
            if !page_marker().is_match(after) {
                *counts.entry(after.trim().to_string()).or_insert(0) += 1;
            }
        }
        if let Some(before) = lines[..i].iter().rev().find(|l| !l.trim().is_empty()) {
            if !page_marker().is_match(before) {
                *counts.entry(before.trim().to_string()).or_insert(0) += 1;
            }
        }
    }
    counts.retain(|_, n| *n >= 3);
    counts
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for part in text.split("\n\n") {
        // Lone blank lines collapse away; multi-blank runs produce empty parts.
        let part = part.trim_matches('\n');
        if !part.trim().is_empty() {
            out.push(part);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_space_runs() {
        let out = trim_boilerplate("a    b\tc\n\nnext  paragraph");
        assert_eq!(out, "a b c\n\nnext paragraph");
    }

    #[test]
    fn test_removes_page_of_lines() {
        let input = "Real content here.\nPage 1 of 12\nMore content.";
        let out = trim_boilerplate(input);
        assert!(!out.contains("Page 1 of 12"));
        assert!(out.contains("Real content here."));
        assert!(out.contains("More content."));
    }

    #[test]
    fn test_removes_bare_page_numbers_and_rules() {
        let input = "Intro.\n42\n-----\nBody.";
        let out = trim_boilerplate(input);
        assert_eq!(out, "Intro.\nBody.");
    }

    #[test]
    fn test_removes_url_only_lines() {
        let input = "See below.\nhttps://example.com/path?q=1\nDone.";
        let out = trim_boilerplate(input);
        assert!(!out.contains("example.com"));
    }

    #[test]
    fn test_keeps_page_markers() {
        let input = "[Page 1]\nAlpha content.\n\n[Page 2]\nBeta content.";
        let out = trim_boilerplate(input);
        assert!(out.contains("[Page 1]"));
        assert!(out.contains("[Page 2]"));
    }

    #[test]
    fn test_removes_repeated_headers_at_page_boundaries() {
        let mut input = String::new();
        for k in 1..=4 {
            input.push_str(&format!("[Page {}]\nACME Corp Annual Report\nBody {}.\n\n", k, k));
        }
        let out = trim_boilerplate(&input);
        assert!(!out.contains("ACME Corp Annual Report"));
        assert!(out.contains("Body 3."));
    }

    #[test]
    fn test_twice_repeated_header_survives() {
        let input = "[Page 1]\nUnique heading\nBody.\n\n[Page 2]\nUnique heading\nMore.";
        let out = trim_boilerplate(input);
        // Two occurrences are below the ≥3 threshold.
        assert!(out.contains("Unique heading"));
    }

    #[test]
    fn test_drops_duplicate_adjacent_paragraphs() {
        let input = "Same paragraph.\n\nSame paragraph.\n\nDifferent one.";
        let out = trim_boilerplate(input);
        assert_eq!(out, "Same paragraph.\n\nDifferent one.");
    }

    #[test]
    fn test_idempotent() {
        let input = "Contents\n\nPage 3 of 9\nReal   text  here.\n\n\n\nReal   text  here.\n\n42\n====\nFinal.";
        let once = trim_boilerplate(input);
        let twice = trim_boilerplate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_idempotent_with_markers() {
        let mut input = String::from("Title line.\n");
        for k in 1..=5 {
            input.push_str(&format!("[Page {}]\nRunning Footer Co\ntext {} body\n", k, k));
        }
        let once = trim_boilerplate(&input);
        let twice = trim_boilerplate(&once);
        assert_eq!(once, twice);
    }
}
