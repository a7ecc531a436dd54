//! Exact token counting against the cl100k_base BPE vocabulary.
//!
//! The encoder is loaded once into a process-wide static and is read-only
//! afterwards, so counting is thread-safe and deterministic: the same text
//! always yields the same count for the lifetime of the vocabulary.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

static BPE: OnceLock<CoreBPE> = OnceLock::new();

fn bpe() -> &'static CoreBPE {
    // Loading the vocabulary is expensive; done once per process.
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is bundled"))
}

/// Exact token count of `text`.
pub fn count(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    bpe().encode_ordinary(text).len()
}

/// Token counts for a batch of texts.
pub fn count_batch<S: AsRef<str>>(texts: &[S]) -> Vec<usize> {
    let enc = bpe();
    texts
        .iter()
        .map(|t| {
            let t = t.as_ref();
            if t.is_empty() {
                0
            } else {
                enc.encode_ordinary(t).len()
            }
        })
        .collect()
}

/// Longest prefix of `text` whose token count is ≤ `max_tokens`.
///
/// Operates on token boundaries, never byte boundaries. If the boundary
/// falls inside a multi-byte scalar (cl100k tokens are byte-level), the
/// prefix is shortened by whole tokens until it decodes cleanly.
pub fn slice(text: &str, max_tokens: usize) -> String {
    if text.is_empty() || max_tokens == 0 {
        return String::new();
    }
    let tokens = bpe().encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return text.to_string();
    }
    let mut end = max_tokens;
    while end > 0 {
        if let Ok(prefix) = bpe().decode(tokens[..end].to_vec()) {
            return prefix;
        }
        end -= 1;
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counts_zero() {
        assert_eq!(count(""), 0);
    }

    #[test]
    fn test_count_is_reproducible() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(count(text), count(text));
        assert!(count(text) > 0);
    }

    #[test]
    fn test_count_batch_matches_single() {
        let texts = ["Hello world.", "", "Second sentence here."];
        let batch = count_batch(&texts);
        for (t, n) in texts.iter().zip(&batch) {
            assert_eq!(count(t), *n);
        }
    }

    #[test]
    fn test_slice_short_text_unchanged() {
        let text = "Hello world.";
        assert_eq!(slice(text, 100), text);
    }

    #[test]
    fn test_slice_respects_budget() {
        let text = "one two three four five six seven eight nine ten ".repeat(50);
        for budget in [1, 5, 37, 120] {
            let prefix = slice(&text, budget);
            assert!(count(&prefix) <= budget, "budget {} exceeded", budget);
            assert!(text.starts_with(&prefix));
        }
    }

    #[test]
    fn test_slice_zero_budget_is_empty() {
        assert_eq!(slice("anything", 0), "");
    }

    #[test]
    fn test_slice_multibyte_never_splits_chars() {
        let text = "héllo wörld ünïcode — ångström ".repeat(40);
        let prefix = slice(&text, 10);
        // A clean decode implies no broken scalar at the cut point.
        assert!(text.starts_with(&prefix));
        assert!(count(&prefix) <= 10);
    }
}
