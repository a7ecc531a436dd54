//! Per-tier context assembly strategies.
//!
//! Each strategy is a function `(inputs…) → AssembledContext`; the engine
//! is the dispatcher that prepares those inputs (canonical text, chunk
//! lists, ranked candidates) and picks the strategy from the document's
//! tier. Everything in this module is pure and synchronous.
//!
//! | Tier | Strategy |
//! |------|----------|
//! | 1 | verbatim injection |
//! | 2 | trim; inject if it fits, else rank trimmed chunks |
//! | 3 | BM25-ranked greedy fill over stored chunks |
//! | 4 | cosine candidates, then the tier-3 greedy fill |

use serde::Serialize;

use crate::budget::{self, TokenBudget};
use crate::chunker;
use crate::config::Config;
use crate::models::ChunkRecord;
use crate::ranker;
use crate::tier::Tier;
use crate::tokenizer;
use crate::trim;

/// Separator between chunks in assembled output.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One accepted chunk in the assembled context, in reading order.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkUsed {
    pub index: usize,
    pub tokens: usize,
    pub score: f32,
}

/// The assembled, budget-bounded context for one query.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub tier: Tier,
    pub text: String,
    pub token_count: usize,
    pub chunks_used: Vec<ChunkUsed>,
    pub strategy_notes: String,
    pub budget: TokenBudget,
}

/// Tier 1: the canonical text goes in verbatim. The slice is a guard for
/// pathologically small windows; with default budgets a tier-1 document
/// always fits.
pub fn assemble_tier1(text: &str, doc_tokens: usize, cfg: &Config) -> AssembledContext {
    let budget = budget::allocate(&cfg.budget, doc_tokens);
    let (text, token_count) = if budget.truncated {
        let sliced = tokenizer::slice(text, budget.document_allocated);
        let tokens = tokenizer::count(&sliced);
        (sliced, tokens)
    } else {
        (text.to_string(), doc_tokens)
    };

    AssembledContext {
        tier: Tier::T1,
        text,
        token_count,
        chunks_used: Vec::new(),
        strategy_notes: "Full document injected directly.".to_string(),
        budget,
    }
}

/// Tier 2: trim boilerplate. If the trimmed text fits the document
/// allocation it is injected whole; otherwise the trimmed text is chunked
/// on the fly and handled like tier 3, honoring the caller's `top_k`. The
/// reported tier stays 2 either way.
pub fn assemble_tier2(
    raw_text: &str,
    query: &str,
    top_k: usize,
    cfg: &Config,
) -> AssembledContext {
    let original_tokens = tokenizer::count(raw_text);
    let trimmed = trim::trim_boilerplate(raw_text);
    let trimmed_tokens = tokenizer::count(&trimmed);
    let saved = original_tokens.saturating_sub(trimmed_tokens);

    let budget = budget::allocate(&cfg.budget, trimmed_tokens);
    if trimmed_tokens <= budget.document_max {
        let mut notes = format!(
            "Boilerplate trimmed: {} → {} tokens (saved {}).",
            original_tokens, trimmed_tokens, saved
        );
        if trimmed_tokens <= cfg.tiers.tier1_max {
            notes.push_str(" Trimmed document fits for direct injection.");
        }
        return AssembledContext {
            tier: Tier::T2,
            text: trimmed,
            token_count: trimmed_tokens,
            chunks_used: Vec::new(),
            strategy_notes: notes,
            budget,
        };
    }

    // Still too large: tier-3 behavior over ephemeral chunks of the
    // trimmed text.
    let chunks = chunker::chunk_text(&trimmed, &cfg.chunking);
    let stats = ranker::build_stats(&chunks);
    let ranked = ranker::rank(&stats, query, cfg.retrieval.bm25_k1, cfg.retrieval.bm25_b);
    let mut assembled = assemble_ranked(&chunks, &ranked, top_k, Tier::T2, cfg);
    assembled.strategy_notes = format!(
        "Boilerplate trimmed: {} → {} tokens (saved {}); still above the document allocation, fell back to chunk ranking. {}",
        original_tokens, trimmed_tokens, saved, assembled.strategy_notes
    );
    assembled
}

/// Tier 3 (and the shared tail of tiers 2 and 4): greedy fill over ranked
/// candidates, assembled in reading order.
///
/// Candidates are visited by descending score; a chunk is accepted when it
/// still fits the document allocation (separator cost included) until
/// `top_k` chunks are accepted or no remaining chunk fits.
pub fn assemble_ranked(
    chunks: &[ChunkRecord],
    ranked: &[(usize, f32)],
    top_k: usize,
    tier: Tier,
    cfg: &Config,
) -> AssembledContext {
    let document_max = cfg.budget.document_max();
    let separator_tokens = tokenizer::count(CHUNK_SEPARATOR);

    let mut accepted: Vec<(usize, f32)> = Vec::new();
    let mut used_tokens = 0usize;

    for &(index, score) in ranked {
        if accepted.len() >= top_k {
            break;
        }
        let chunk = &chunks[index];
        let cost = if accepted.is_empty() {
            chunk.tokens
        } else {
            chunk.tokens + separator_tokens
        };
        if used_tokens + cost > document_max {
            continue;
        }
        accepted.push((index, score));
        used_tokens += cost;
    }

    accepted.sort_by_key(|&(index, _)| index);

    let text = accepted
        .iter()
        .map(|&(index, _)| chunks[index].text.as_str())
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR);
    let token_count = tokenizer::count(&text);

    let chunks_used: Vec<ChunkUsed> = accepted
        .iter()
        .map(|&(index, score)| ChunkUsed {
            index,
            tokens: chunks[index].tokens,
            score,
        })
        .collect();

    let strategy_notes = format!(
        "Document split into {} chunks. Top {} selected via BM25 ranking ({} tokens).",
        chunks.len(),
        chunks_used.len(),
        used_tokens
    );

    AssembledContext {
        tier,
        text,
        token_count,
        chunks_used,
        strategy_notes,
        budget: budget::allocate(&cfg.budget, used_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        let mut cfg = Config::default();
        cfg.budget.total_window = 1_000;
        cfg.budget.system_prompt = 100;
        cfg.budget.conversation_history = 100;
        cfg.budget.response_buffer = 100;
        cfg.chunking.target_tokens = 40;
        cfg.chunking.overlap_tokens = 8;
        cfg.chunking.max_tokens = 60;
        cfg
    }

    fn chunk(index: usize, text: &str) -> ChunkRecord {
        ChunkRecord {
            index,
            tokens: tokenizer::count(text),
            text: text.to_string(),
            section: None,
        }
    }

    #[test]
    fn test_tier1_verbatim_roundtrip() {
        let cfg = cfg();
        let text = "Hello world. This is a test.";
        let out = assemble_tier1(text, tokenizer::count(text), &cfg);
        assert_eq!(out.text, text);
        assert!(out.chunks_used.is_empty());
        assert_eq!(out.token_count, tokenizer::count(text));
        assert!(out.token_count <= out.budget.document_allocated.max(1));
    }

    #[test]
    fn test_tier1_truncates_when_window_tiny() {
        let mut cfg = cfg();
        cfg.budget.total_window = 310; // leaves 10 tokens for the document
        let text = "word ".repeat(100);
        let doc_tokens = tokenizer::count(&text);
        let out = assemble_tier1(&text, doc_tokens, &cfg);
        assert!(out.budget.truncated);
        assert!(out.token_count <= out.budget.document_allocated);
    }

    #[test]
    fn test_tier2_injects_trimmed_text() {
        let cfg = cfg();
        let raw = "Useful content here.\nPage 1 of 9\nMore useful content.";
        let out = assemble_tier2(raw, "useful", 10, &cfg);
        assert_eq!(out.tier, Tier::T2);
        assert!(!out.text.contains("Page 1 of 9"));
        assert!(out.strategy_notes.contains("trimmed"));
        assert!(out.chunks_used.is_empty());
    }

    #[test]
    fn test_tier2_falls_back_to_ranking_when_too_large() {
        let mut cfg = cfg();
        cfg.budget.total_window = 500; // 200-token document allocation
        let raw = (0..60)
            .map(|i| format!("Sentence {} mentions subject {}.", i, i % 5))
            .collect::<Vec<_>>()
            .join(" ");
        let out = assemble_tier2(&raw, "subject", 10, &cfg);
        assert_eq!(out.tier, Tier::T2);
        assert!(!out.chunks_used.is_empty());
        assert!(out.strategy_notes.contains("fell back to chunk ranking"));
        assert!(out.token_count <= out.budget.document_max);

        // The caller's top_k bounds the fallback selection.
        let narrow = assemble_tier2(&raw, "subject", 1, &cfg);
        assert_eq!(narrow.chunks_used.len(), 1);
    }

    #[test]
    fn test_ranked_fill_respects_budget_and_order() {
        let cfg = cfg();
        let chunks: Vec<ChunkRecord> = (0..10)
            .map(|i| chunk(i, &format!("Chunk {} talks about topic {}.", i, i)))
            .collect();
        // Descending score favors high indices.
        let ranked: Vec<(usize, f32)> = (0..10).rev().map(|i| (i, i as f32)).collect();
        let out = assemble_ranked(&chunks, &ranked, 3, Tier::T3, &cfg);

        assert_eq!(out.chunks_used.len(), 3);
        let indices: Vec<usize> = out.chunks_used.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![7, 8, 9]); // reading order
        assert!(out.text.contains(CHUNK_SEPARATOR.trim()));
        assert!(out.token_count <= out.budget.document_allocated);
    }

    #[test]
    fn test_ranked_fill_skips_oversized_chunks() {
        let mut cfg = cfg();
        cfg.budget.total_window = 330; // 30-token document allocation
        let big = chunk(0, &"big words repeated over and over again ".repeat(20));
        let small = chunk(1, "Tiny chunk.");
        let chunks = vec![big, small];
        let ranked = vec![(0usize, 2.0f32), (1usize, 1.0f32)];
        let out = assemble_ranked(&chunks, &ranked, 5, Tier::T3, &cfg);

        // The oversized top hit is skipped, the smaller one still lands.
        assert_eq!(out.chunks_used.len(), 1);
        assert_eq!(out.chunks_used[0].index, 1);
    }

    #[test]
    fn test_ranked_fill_empty_candidates() {
        let cfg = cfg();
        let out = assemble_ranked(&[], &[], 5, Tier::T3, &cfg);
        assert!(out.text.is_empty());
        assert!(out.chunks_used.is_empty());
        assert_eq!(out.token_count, 0);
    }
}
