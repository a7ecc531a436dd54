//! # Smart Document Context Handler (sdch)
//!
//! **Adaptive, token-budgeted context construction for LLM windows.**
//!
//! SDCH ingests heterogeneous documents (text, Markdown, PDF, DOCX,
//! CSV/TSV, XLSX) and, on demand, assembles a bounded, query-relevant
//! context for a fixed-size model window. Each document is classified once
//! into a processing tier by its exact token count, and queries dispatch
//! to the matching strategy.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌───────────┐
//! │  Loader  │──▶│ Tokenizer │──▶│ Classifier │──▶│  SQLite   │
//! │ pdf/docx │   │ cl100k    │   │  tier 1–4  │   │ docs+chunks│
//! └──────────┘   └───────────┘   └─────┬──────┘   └─────┬─────┘
//!                                      │ tier ≥ 3        │
//!                                ┌─────▼──────┐   ┌──────▼─────┐
//!                                │  Chunker   │──▶│  Artifact  │──▶ Redis
//!                                │ + Embedder │   │ BM25 + vec │
//!                                └────────────┘   └──────┬─────┘
//!                                                        │
//!                               ┌────────────────────────┤
//!                               ▼                        ▼
//!                          ┌─────────┐             ┌──────────┐
//!                          │   CLI   │             │   HTTP   │
//!                          │ (sdch)  │             │  (axum)  │
//!                          └─────────┘             └──────────┘
//! ```
//!
//! ## Tiers
//!
//! | Tier | Tokens | Strategy |
//! |------|--------|----------|
//! | 1 | ≤ 12 000 | full document injected verbatim |
//! | 2 | ≤ 25 000 | boilerplate trimmed, injected (or ranked if still large) |
//! | 3 | ≤ 50 000 | sentence chunks, BM25 greedy fill |
//! | 4 | > 50 000 | embedding retrieval, cosine top-k, BM25 fallback |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`loader`] | bytes + MIME → canonical UTF-8 text with structural hints |
//! | [`tokenizer`] | cl100k_base counting and token-bounded slicing |
//! | [`tier`] | token count → tier with display metadata |
//! | [`budget`] | context-window role allocation |
//! | [`trim`] | boilerplate removal (idempotent) |
//! | [`chunker`] | sentence-aware chunking with overlap |
//! | [`ranker`] | BM25 scoring with serializable statistics |
//! | [`vector`] | flat cosine index, exact top-k |
//! | [`embedder`] | primary/fallback embedding gateway with retries |
//! | [`artifact`] | index artifact wire format |
//! | [`assembler`] | per-tier assembly strategies |
//! | [`engine`] | orchestration: upload/query pipelines, single-flight builds |
//! | [`store`] | SQLite metadata store |
//! | [`cache`] | Redis artifact cache (best-effort) |
//! | [`server`] | HTTP API |
//! | [`config`] | environment-driven configuration |
//! | [`error`] | engine error taxonomy |

pub mod artifact;
pub mod assembler;
pub mod budget;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod loader;
pub mod models;
pub mod ranker;
pub mod server;
pub mod store;
pub mod tier;
pub mod tokenizer;
pub mod trim;
pub mod vector;
