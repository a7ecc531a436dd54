//! Index artifact: the serialized per-document bundle of chunk texts,
//! BM25 statistics, and (optionally) the embedding matrix.
//!
//! Wire layout, little-endian throughout:
//!
//! ```text
//! offset  size      field
//! 0       4         magic "SDCH"
//! 4       1         version (currently 1)
//! 5       1         embedder id (0 = none, 1 = primary, 2 = fallback)
//! 6       4         embedding dimension d
//! 10      4         chunk count N
//! 14      N·d·4     embedding matrix, row-major f32
//! ...     4         JSON tail length
//! ...     tail      JSON: { chunks, stats }
//! ```
//!
//! Decoding is strict about the header and tolerant of nothing else: any
//! malformed blob is an error, which callers treat as a cache miss and
//! rebuild from the durable chunk rows.

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ChunkRecord;
use crate::ranker::Bm25Stats;

const MAGIC: [u8; 4] = *b"SDCH";
const VERSION: u8 = 1;

/// Which embedding backend produced the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderId {
    Primary,
    Fallback,
}

impl EmbedderId {
    fn as_byte(self) -> u8 {
        match self {
            EmbedderId::Primary => 1,
            EmbedderId::Fallback => 2,
        }
    }

    fn from_byte(b: u8) -> anyhow::Result<Option<EmbedderId>> {
        match b {
            0 => Ok(None),
            1 => Ok(Some(EmbedderId::Primary)),
            2 => Ok(Some(EmbedderId::Fallback)),
            other => bail!("unknown embedder id: {}", other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmbedderId::Primary => "primary",
            EmbedderId::Fallback => "fallback",
        }
    }
}

/// In-memory form of the artifact.
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    /// Backend that produced `matrix`; `None` when embedding failed or was
    /// not attempted (BM25-only artifact).
    pub embedder: Option<EmbedderId>,
    /// Embedding dimension; 0 when there is no matrix.
    pub dim: usize,
    /// Ordered chunk records, index-aligned with the matrix rows.
    pub chunks: Vec<ChunkRecord>,
    pub stats: Bm25Stats,
    /// Row-major `N×dim` L2-normalized embeddings; empty when `dim == 0`.
    pub matrix: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Tail {
    chunks: Vec<ChunkRecord>,
    stats: Bm25Stats,
}

impl IndexArtifact {
    pub fn has_embeddings(&self) -> bool {
        self.embedder.is_some() && self.dim > 0 && !self.matrix.is_empty()
    }

    /// One matrix row, if embeddings are present.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if !self.has_embeddings() || i >= self.chunks.len() {
            return None;
        }
        let start = i * self.dim;
        self.matrix.get(start..start + self.dim)
    }

    pub fn encode(&self) -> Vec<u8> {
        let tail = serde_json::to_vec(&Tail {
            chunks: self.chunks.clone(),
            stats: self.stats.clone(),
        })
        .expect("artifact tail serializes");

        let mut out =
            Vec::with_capacity(14 + self.matrix.len() * 4 + 4 + tail.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(self.embedder.map(EmbedderId::as_byte).unwrap_or(0));
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        for v in &self.matrix {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(tail.len() as u32).to_le_bytes());
        out.extend_from_slice(&tail);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<IndexArtifact> {
        let inner = || -> anyhow::Result<IndexArtifact> {
            if bytes.len() < 14 {
                bail!("artifact too short: {} bytes", bytes.len());
            }
            if bytes[0..4] != MAGIC {
                bail!("bad artifact magic");
            }
            if bytes[4] != VERSION {
                bail!("unsupported artifact version: {}", bytes[4]);
            }
            let embedder = EmbedderId::from_byte(bytes[5])?;
            let dim = u32::from_le_bytes(bytes[6..10].try_into()?) as usize;
            let n = u32::from_le_bytes(bytes[10..14].try_into()?) as usize;

            let matrix_bytes = n
                .checked_mul(dim)
                .and_then(|c| c.checked_mul(4))
                .ok_or_else(|| anyhow!("artifact matrix size overflow"))?;
            let matrix_end = 14 + matrix_bytes;
            if bytes.len() < matrix_end + 4 {
                bail!("artifact truncated before tail");
            }

            let mut matrix = Vec::with_capacity(n * dim);
            for chunk in bytes[14..matrix_end].chunks_exact(4) {
                matrix.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }

            let tail_len =
                u32::from_le_bytes(bytes[matrix_end..matrix_end + 4].try_into()?) as usize;
            let tail_start = matrix_end + 4;
            if bytes.len() < tail_start + tail_len {
                bail!("artifact tail truncated");
            }
            let tail: Tail = serde_json::from_slice(&bytes[tail_start..tail_start + tail_len])?;

            if tail.chunks.len() != n {
                bail!(
                    "artifact chunk count mismatch: header {}, tail {}",
                    n,
                    tail.chunks.len()
                );
            }

            Ok(IndexArtifact {
                embedder,
                dim,
                chunks: tail.chunks,
                stats: tail.stats,
                matrix,
            })
        };
        inner().map_err(Into::into)
    }
}
