//! Sentence-aware chunking with token targets and overlap.
//!
//! Sentences are accumulated greedily into chunks of roughly
//! `target_tokens`, never exceeding `max_tokens`. Each chunk after the
//! first opens with a sentence-aligned suffix of its predecessor totalling
//! at least `overlap_tokens`, so overlap regions appear in exactly two
//! chunks. A single sentence larger than the hard max is split on token
//! boundaries.
//!
//! Sentence boundaries: a terminator (`.` `!` `?`, plus trailing quotes or
//! brackets) followed by whitespace and something that starts a sentence.
//! Newlines are implicit boundaries, so CSV rows and page-marker lines
//! segment cleanly. Page and sheet markers set the section hint carried on
//! each chunk.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;
use crate::models::ChunkRecord;
use crate::tokenizer;

struct Sentence {
    text: String,
    tokens: usize,
    section: Option<String>,
}

fn page_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^\[Page (\d+)\]$").expect("static pattern"))
}

/// Split canonical text into sentence-aligned, token-bounded chunks with
/// dense indices starting at 0.
pub fn chunk_text(text: &str, cfg: &ChunkingConfig) -> Vec<ChunkRecord> {
    let sentences = collect_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<ChunkRecord> = Vec::new();
    // Current chunk as sentence indices; the first `carried` of them were
    // copied from the previous chunk as overlap.
    let mut cur: Vec<usize> = Vec::new();
    let mut cur_tokens = 0usize;
    let mut carried = 0usize;

    let mut i = 0usize;
    while i < sentences.len() {
        let s_tokens = sentences[i].tokens;

        if s_tokens > cfg.max_tokens {
            // Oversized sentence: flush whatever is pending, then split the
            // sentence itself on token boundaries.
            if cur.len() > carried {
                emit(&mut chunks, &sentences, &cur);
            }
            cur.clear();
            cur_tokens = 0;
            carried = 0;

            let mut rest = sentences[i].text.as_str();
            while !rest.is_empty() {
                let piece = tokenizer::slice(rest, cfg.max_tokens);
                if piece.is_empty() {
                    break;
                }
                let piece_len = piece.len();
                push_chunk(&mut chunks, piece, sentences[i].section.clone());
                rest = rest[piece_len..].trim_start();
            }
            i += 1;
            continue;
        }

        let has_new = cur.len() > carried;
        if has_new && (cur_tokens + s_tokens > cfg.max_tokens || cur_tokens >= cfg.target_tokens) {
            emit(&mut chunks, &sentences, &cur);
            let (overlap, overlap_tokens) =
                overlap_suffix(&cur, &sentences, cfg.overlap_tokens);
            carried = overlap.len();
            cur = overlap;
            cur_tokens = overlap_tokens;
            continue;
        }

        if !has_new && cur_tokens + s_tokens > cfg.max_tokens {
            // The carried overlap leaves no room for even one new sentence;
            // shed it from the front rather than emitting a chunk with no
            // new content.
            while !cur.is_empty() && cur_tokens + s_tokens > cfg.max_tokens {
                let dropped = cur.remove(0);
                cur_tokens -= sentences[dropped].tokens;
                carried = carried.saturating_sub(1);
            }
        }

        cur.push(i);
        cur_tokens += s_tokens;
        i += 1;
    }

    if cur.len() > carried {
        emit(&mut chunks, &sentences, &cur);
    }

    chunks
}

fn emit(chunks: &mut Vec<ChunkRecord>, sentences: &[Sentence], indices: &[usize]) {
    let text = indices
        .iter()
        .map(|&i| sentences[i].text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let section = indices.first().and_then(|&i| sentences[i].section.clone());
    push_chunk(chunks, text, section);
}

fn push_chunk(chunks: &mut Vec<ChunkRecord>, text: String, section: Option<String>) {
    let tokens = tokenizer::count(&text);
    chunks.push(ChunkRecord {
        index: chunks.len(),
        tokens,
        text,
        section,
    });
}

/// Minimal trailing run of sentences totalling at least `overlap` tokens.
/// Never the whole chunk: at least the first sentence stays out, so the
/// next chunk always makes progress.
fn overlap_suffix(cur: &[usize], sentences: &[Sentence], overlap: usize) -> (Vec<usize>, usize) {
    if overlap == 0 || cur.len() <= 1 {
        return (Vec::new(), 0);
    }
    let mut acc = 0usize;
    let mut start = cur.len();
    while start > 1 && acc < overlap {
        start -= 1;
        acc += sentences[cur[start]].tokens;
    }
    (cur[start..].to_vec(), acc)
}

fn collect_sentences(text: &str) -> Vec<Sentence> {
    let mut out = Vec::new();
    let mut section: Option<String> = None;

    let mut pending: Vec<(String, Option<String>)> = Vec::new();
    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = page_marker().captures(line) {
            section = Some(format!("Page {}", &caps[1]));
        } else if let Some(name) = line.strip_prefix("# Sheet: ") {
            section = Some(format!("Sheet {}", name.trim()));
        }
        for sentence in split_line(line) {
            pending.push((sentence, section.clone()));
        }
    }

    let counts = tokenizer::count_batch(
        &pending.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
    );
    for ((text, section), tokens) in pending.into_iter().zip(counts) {
        out.push(Sentence {
            text,
            tokens,
            section,
        });
    }
    out
}

/// Split one line into sentences. The line itself is already an implicit
/// boundary on both ends.
fn split_line(line: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start_byte = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i].1;
        if !matches!(ch, '.' | '!' | '?') {
            i += 1;
            continue;
        }
        // Absorb repeated terminators and closing quotes/brackets.
        let mut j = i + 1;
        while j < chars.len()
            && matches!(chars[j].1, '.' | '!' | '?' | '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
        {
            j += 1;
        }
        if j < chars.len() && chars[j].1.is_whitespace() {
            let mut k = j;
            while k < chars.len() && chars[k].1.is_whitespace() {
                k += 1;
            }
            if k >= chars.len() || starts_sentence(chars[k].1) {
                let end_byte = chars[j].0;
                let sentence = line[start_byte..end_byte].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start_byte = if k < chars.len() { chars[k].0 } else { line.len() };
                i = k;
                continue;
            }
        }
        i = j;
    }

    let tail = line[start_byte..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn starts_sentence(c: char) -> bool {
    c.is_uppercase() || c.is_ascii_digit() || matches!(c, '"' | '\'' | '(' | '[' | '#' | '\u{201c}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: usize, overlap: usize, max: usize) -> ChunkingConfig {
        ChunkingConfig {
            target_tokens: target,
            overlap_tokens: overlap,
            max_tokens: max,
        }
    }

    fn prose(n_sentences: usize) -> String {
        (0..n_sentences)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello world. This is a test.", &cfg(512, 64, 768));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert!(chunks[0].text.contains("Hello world."));
        assert!(chunks[0].text.contains("This is a test."));
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("", &cfg(512, 64, 768)).is_empty());
    }

    #[test]
    fn test_indices_dense_from_zero() {
        let chunks = chunk_text(&prose(200), &cfg(40, 10, 60));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_chunks_respect_hard_max() {
        let chunks = chunk_text(&prose(300), &cfg(40, 10, 60));
        for c in &chunks {
            assert!(c.tokens <= 60, "chunk {} has {} tokens", c.index, c.tokens);
        }
    }

    #[test]
    fn test_every_sentence_appears() {
        let text = prose(120);
        let chunks = chunk_text(&text, &cfg(40, 10, 60));
        for i in 0..120 {
            let needle = format!("Sentence number {} ", i);
            assert!(
                chunks.iter().any(|c| c.text.contains(&needle)),
                "sentence {} missing from all chunks",
                i
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = chunk_text(&prose(200), &cfg(50, 15, 80));
        for pair in chunks.windows(2) {
            let last_sentence = pair[0]
                .text
                .rsplit(". ")
                .next()
                .unwrap()
                .trim_end_matches('.');
            assert!(
                pair[1].text.contains(last_sentence),
                "chunk {} does not overlap with its predecessor",
                pair[1].index
            );
        }
    }

    #[test]
    fn test_oversized_sentence_split_on_token_boundaries() {
        // One giant "sentence" with no terminators.
        let giant = "word ".repeat(500);
        let chunks = chunk_text(&giant, &cfg(40, 10, 60));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.tokens <= 60);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = prose(150);
        let a = chunk_text(&text, &cfg(40, 10, 60));
        let b = chunk_text(&text, &cfg(40, 10, 60));
        assert_eq!(a, b);
    }

    #[test]
    fn test_section_hint_follows_page_markers() {
        let text = "[Page 1]\nAlpha content on the first page.\n\n[Page 2]\nBeta content on the second page.";
        let chunks = chunk_text(text, &cfg(512, 64, 768));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section.as_deref(), Some("Page 1"));

        let many = format!(
            "[Page 1]\n{}\n[Page 2]\n{}",
            prose(80),
            prose(80).replace("topic", "subject")
        );
        let chunks = chunk_text(&many, &cfg(40, 10, 60));
        assert!(chunks.iter().any(|c| c.section.as_deref() == Some("Page 1")));
        assert!(chunks.iter().any(|c| c.section.as_deref() == Some("Page 2")));
    }

    #[test]
    fn test_abbreviation_mid_sentence_not_split() {
        let text = "The value was approx. twelve units in total. A second sentence follows.";
        let chunks = chunk_text(text, &cfg(512, 64, 768));
        // "approx. twelve" must not split: next char is lowercase.
        assert_eq!(chunks.len(), 1);
        let sentences = split_line(text);
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("approx. twelve"));
    }
}
