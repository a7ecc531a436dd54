//! Environment-driven configuration.
//!
//! All knobs come from the process environment (see the table below) with
//! defaults matching a 200K-token context window. `Config::from_env` reads
//! and validates everything once at startup; the rest of the engine takes
//! `&Config` and never touches the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | `sqlite:data/sdch.db` |
//! | `REDIS_URL` | unset (cache disabled) |
//! | `REDIS_CACHE_TTL_SECS` | unset (unbounded) |
//! | `UPLOAD_DIR` | `data/uploads` |
//! | `MAX_FILE_SIZE_MB` | `50` |
//! | `BIND_ADDR` | `127.0.0.1:8000` |
//! | `TIER1_MAX_TOKENS` / `TIER2_MAX_TOKENS` / `TIER3_MAX_TOKENS` | `12000` / `25000` / `50000` |
//! | `CHUNK_TARGET_TOKENS` / `CHUNK_OVERLAP_TOKENS` / `CHUNK_MAX_TOKENS` | `512` / `64` / `768` |
//! | `RAG_TOP_K` | `10` |
//! | `TOTAL_CONTEXT_WINDOW` | `200000` |
//! | `RESERVED_SYSTEM_TOKENS` / `RESERVED_HISTORY_TOKENS` / `RESERVED_RESPONSE_TOKENS` | `2000` / `10000` / `4000` |
//! | `OPENAI_API_KEY` | unset (fallback embedder only) |
//! | `EMBED_TIMEOUT_SECS` | `30` |

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub upload_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub bind_addr: String,
    pub tiers: TierConfig,
    pub chunking: ChunkingConfig,
    pub budget: BudgetConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    /// Wall-clock ceiling for one context assembly, build included.
    pub assembler_timeout_secs: u64,
}

/// Tier thresholds in tokens: tier = 1 if ≤ `tier1_max`, 2 if ≤ `tier2_max`,
/// 3 if ≤ `tier3_max`, otherwise 4.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier1_max: usize,
    pub tier2_max: usize,
    pub tier3_max: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub max_tokens: usize,
}

/// Fixed context-window allocations. The document allocation is derived:
/// `total_window − system − history − response_buffer`, clamped to ≥ 0.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub total_window: usize,
    pub system_prompt: usize,
    pub conversation_history: usize,
    pub response_buffer: usize,
}

impl BudgetConfig {
    pub fn document_max(&self) -> usize {
        self.total_window
            .saturating_sub(self.system_prompt)
            .saturating_sub(self.conversation_history)
            .saturating_sub(self.response_buffer)
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Primary provider credential; empty or unset means fallback-only.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_dims: usize,
    /// Attempts per embedding call (first try included).
    pub max_attempts: u32,
    /// Initial backoff before the second attempt; doubles per retry, jittered.
    pub initial_backoff_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Artifact TTL in seconds; `None` leaves eviction to the store.
    pub ttl_secs: Option<u64>,
    /// Per-operation deadline. Cache calls past this are treated as misses.
    pub op_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/sdch.db".to_string(),
            redis_url: None,
            upload_dir: PathBuf::from("data/uploads"),
            max_file_size_mb: 50,
            bind_addr: "127.0.0.1:8000".to_string(),
            tiers: TierConfig {
                tier1_max: 12_000,
                tier2_max: 25_000,
                tier3_max: 50_000,
            },
            chunking: ChunkingConfig {
                target_tokens: 512,
                overlap_tokens: 64,
                max_tokens: 768,
            },
            budget: BudgetConfig {
                total_window: 200_000,
                system_prompt: 2_000,
                conversation_history: 10_000,
                response_buffer: 4_000,
            },
            retrieval: RetrievalConfig {
                top_k: 10,
                bm25_k1: 1.5,
                bm25_b: 0.75,
            },
            embedding: EmbeddingConfig {
                openai_api_key: None,
                openai_model: "text-embedding-3-small".to_string(),
                openai_dims: 1536,
                max_attempts: 3,
                initial_backoff_ms: 200,
                timeout_secs: 30,
            },
            cache: CacheConfig {
                ttl_secs: None,
                op_timeout_ms: 1_000,
            },
            assembler_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults,
    /// and validate it.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(url) = env_string("DATABASE_URL") {
            cfg.database_url = url;
        }
        cfg.redis_url = env_string("REDIS_URL");
        if let Some(dir) = env_string("UPLOAD_DIR") {
            cfg.upload_dir = PathBuf::from(dir);
        }
        if let Some(bind) = env_string("BIND_ADDR") {
            cfg.bind_addr = bind;
        }

        cfg.max_file_size_mb = env_parse("MAX_FILE_SIZE_MB", cfg.max_file_size_mb)?;
        cfg.tiers.tier1_max = env_parse("TIER1_MAX_TOKENS", cfg.tiers.tier1_max)?;
        cfg.tiers.tier2_max = env_parse("TIER2_MAX_TOKENS", cfg.tiers.tier2_max)?;
        cfg.tiers.tier3_max = env_parse("TIER3_MAX_TOKENS", cfg.tiers.tier3_max)?;
        cfg.chunking.target_tokens = env_parse("CHUNK_TARGET_TOKENS", cfg.chunking.target_tokens)?;
        cfg.chunking.overlap_tokens =
            env_parse("CHUNK_OVERLAP_TOKENS", cfg.chunking.overlap_tokens)?;
        cfg.chunking.max_tokens = env_parse("CHUNK_MAX_TOKENS", cfg.chunking.max_tokens)?;
        cfg.retrieval.top_k = env_parse("RAG_TOP_K", cfg.retrieval.top_k)?;
        cfg.budget.total_window = env_parse("TOTAL_CONTEXT_WINDOW", cfg.budget.total_window)?;
        cfg.budget.system_prompt = env_parse("RESERVED_SYSTEM_TOKENS", cfg.budget.system_prompt)?;
        cfg.budget.conversation_history =
            env_parse("RESERVED_HISTORY_TOKENS", cfg.budget.conversation_history)?;
        cfg.budget.response_buffer =
            env_parse("RESERVED_RESPONSE_TOKENS", cfg.budget.response_buffer)?;
        cfg.embedding.timeout_secs = env_parse("EMBED_TIMEOUT_SECS", cfg.embedding.timeout_secs)?;
        cfg.assembler_timeout_secs =
            env_parse("ASSEMBLER_TIMEOUT_SECS", cfg.assembler_timeout_secs)?;
        cfg.embedding.openai_api_key = env_string("OPENAI_API_KEY");
        cfg.cache.ttl_secs = match env_string("REDIS_CACHE_TTL_SECS") {
            Some(v) => Some(
                v.parse()
                    .context("REDIS_CACHE_TTL_SECS must be an integer")?,
            ),
            None => None,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.tier1_max == 0
            || self.tiers.tier1_max >= self.tiers.tier2_max
            || self.tiers.tier2_max >= self.tiers.tier3_max
        {
            bail!(
                "tier thresholds must be strictly increasing and positive: {} / {} / {}",
                self.tiers.tier1_max,
                self.tiers.tier2_max,
                self.tiers.tier3_max
            );
        }
        if self.chunking.target_tokens == 0 {
            bail!("CHUNK_TARGET_TOKENS must be > 0");
        }
        if self.chunking.max_tokens < self.chunking.target_tokens {
            bail!(
                "CHUNK_MAX_TOKENS ({}) must be >= CHUNK_TARGET_TOKENS ({})",
                self.chunking.max_tokens,
                self.chunking.target_tokens
            );
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            bail!(
                "CHUNK_OVERLAP_TOKENS ({}) must be < CHUNK_TARGET_TOKENS ({})",
                self.chunking.overlap_tokens,
                self.chunking.target_tokens
            );
        }
        if self.retrieval.top_k == 0 {
            bail!("RAG_TOP_K must be >= 1");
        }
        if self.budget.document_max() == 0 {
            bail!(
                "reserved allocations ({} + {} + {}) leave no room for documents in a {}-token window",
                self.budget.system_prompt,
                self.budget.conversation_history,
                self.budget.response_buffer,
                self.budget.total_window
            );
        }
        if self.max_file_size_mb == 0 {
            bail!("MAX_FILE_SIZE_MB must be >= 1");
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is not a valid value for {}: {}", v, name, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.budget.document_max(), 184_000);
    }

    #[test]
    fn test_reversed_thresholds_rejected() {
        let mut cfg = Config::default();
        cfg.tiers.tier2_max = cfg.tiers.tier1_max;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overlap_must_stay_below_target() {
        let mut cfg = Config::default();
        cfg.chunking.overlap_tokens = cfg.chunking.target_tokens;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_reserved_cannot_swallow_window() {
        let mut cfg = Config::default();
        cfg.budget.total_window = 10_000;
        assert!(cfg.validate().is_err());
    }
}
