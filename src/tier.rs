//! Tier classification: token count → processing strategy.
//!
//! | Tier | Token range | Strategy |
//! |------|-------------|----------|
//! | 1 | ≤ τ₁ | Direct injection (full document) |
//! | 2 | τ₁ < n ≤ τ₂ | Boilerplate trimming |
//! | 3 | τ₂ < n ≤ τ₃ | Sentence chunking + BM25 ranking |
//! | 4 | > τ₃ | Embedding retrieval |
//!
//! A document's tier is derived once at upload from its exact token count
//! and never changes.

use serde::{Deserialize, Serialize};

use crate::config::TierConfig;

/// Processing tier, ordered by document size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    T1,
    T2,
    T3,
    T4,
}

impl Tier {
    pub fn as_u8(&self) -> u8 {
        match self {
            Tier::T1 => 1,
            Tier::T2 => 2,
            Tier::T3 => 3,
            Tier::T4 => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::T1 => "Direct Injection",
            Tier::T2 => "Smart Trimming",
            Tier::T3 => "Strategic Chunking",
            Tier::T4 => "RAG Retrieval",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Tier::T1 => "#22c55e",
            Tier::T2 => "#3b82f6",
            Tier::T3 => "#f59e0b",
            Tier::T4 => "#ef4444",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tier::T1 => "Full document fits in the context window. No processing needed.",
            Tier::T2 => "Moderate size. Boilerplate removal and whitespace compression applied.",
            Tier::T3 => "Large document. Sentence-aware chunking with BM25 relevance ranking.",
            Tier::T4 => "Very large document. Vector embeddings with cosine-similarity retrieval.",
        }
    }
}

impl From<Tier> for u8 {
    fn from(t: Tier) -> u8 {
        t.as_u8()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(v: u8) -> Result<Tier, String> {
        match v {
            1 => Ok(Tier::T1),
            2 => Ok(Tier::T2),
            3 => Ok(Tier::T3),
            4 => Ok(Tier::T4),
            other => Err(format!("invalid tier: {}", other)),
        }
    }
}

/// Tier metadata returned with every upload response.
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    pub tier: u8,
    pub label: &'static str,
    pub color: &'static str,
    pub description: &'static str,
}

impl From<Tier> for TierInfo {
    fn from(t: Tier) -> TierInfo {
        TierInfo {
            tier: t.as_u8(),
            label: t.label(),
            color: t.color(),
            description: t.description(),
        }
    }
}

/// Map a token count onto a tier using the configured thresholds.
pub fn classify(token_count: usize, cfg: &TierConfig) -> Tier {
    if token_count <= cfg.tier1_max {
        Tier::T1
    } else if token_count <= cfg.tier2_max {
        Tier::T2
    } else if token_count <= cfg.tier3_max {
        Tier::T3
    } else {
        Tier::T4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TierConfig {
        TierConfig {
            tier1_max: 12_000,
            tier2_max: 25_000,
            tier3_max: 50_000,
        }
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let c = cfg();
        assert_eq!(classify(0, &c), Tier::T1);
        assert_eq!(classify(12_000, &c), Tier::T1);
        assert_eq!(classify(12_001, &c), Tier::T2);
        assert_eq!(classify(25_000, &c), Tier::T2);
        assert_eq!(classify(25_001, &c), Tier::T3);
        assert_eq!(classify(50_000, &c), Tier::T3);
        assert_eq!(classify(50_001, &c), Tier::T4);
    }

    #[test]
    fn test_classification_is_monotone() {
        let c = cfg();
        let mut last = Tier::T1;
        for n in (0..60_000).step_by(997) {
            let t = classify(n, &c);
            assert!(t >= last, "tier decreased at {} tokens", n);
            last = t;
        }
    }

    #[test]
    fn test_tier_roundtrips_through_u8() {
        for t in [Tier::T1, Tier::T2, Tier::T3, Tier::T4] {
            assert_eq!(Tier::try_from(t.as_u8()).unwrap(), t);
        }
        assert!(Tier::try_from(0u8).is_err());
        assert!(Tier::try_from(5u8).is_err());
    }
}
