//! Engine: upload and query orchestration over the store, cache, and
//! embedding gateway.
//!
//! Upload pipeline: size gate → load → count → classify → persist the
//! canonical-text artifact → (tier ≥ 3) chunk → (tier 4) embed → one
//! store transaction for document + chunks → cache the index artifact.
//! Embedding failures degrade the document to BM25-only retrieval; they
//! never abort an upload.
//!
//! Query pipeline: record lookup → tier dispatch into the assembler. For
//! tiers 3 and 4 the index artifact is resolved warm-cache → Redis →
//! build, with per-document single-flight: concurrent cache misses on one
//! document share a single build, and every waiter sees the same artifact.
//!
//! Cancellation is checked between phases and raced against embedder
//! calls; a cancelled request writes nothing.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifact::IndexArtifact;
use crate::assembler::{self, AssembledContext};
use crate::cache::IndexCache;
use crate::chunker;
use crate::config::Config;
use crate::embedder::EmbeddingGateway;
use crate::error::{EngineError, Result};
use crate::loader;
use crate::models::{ChunkRecord, Document, DocumentStatus};
use crate::ranker;
use crate::store;
use crate::tier::{self, Tier};
use crate::tokenizer;
use crate::vector;

/// Result of one query: the document record and the assembled context.
#[derive(Debug)]
pub struct QueryOutcome {
    pub document: Document,
    pub context: AssembledContext,
}

pub struct Engine {
    cfg: Config,
    pool: sqlx::SqlitePool,
    cache: IndexCache,
    gateway: EmbeddingGateway,
    /// Warm in-process artifact cache, keyed by document id.
    warm: Mutex<HashMap<Uuid, Arc<IndexArtifact>>>,
    /// Per-document build locks for single-flight coordination. Entries
    /// are pruned once a build finishes.
    building: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Engine {
    /// Connect all collaborators from configuration and run migrations.
    pub async fn new(cfg: Config) -> anyhow::Result<Self> {
        let pool = store::connect(&cfg.database_url).await?;
        store::run_migrations(&pool).await?;
        let cache = IndexCache::connect(cfg.redis_url.as_deref(), &cfg.cache).await;
        let gateway = EmbeddingGateway::from_config(&cfg.embedding);
        Ok(Self::with_parts(cfg, pool, cache, gateway))
    }

    /// Assemble an engine from existing parts (tests, embedded use).
    pub fn with_parts(
        cfg: Config,
        pool: sqlx::SqlitePool,
        cache: IndexCache,
        gateway: EmbeddingGateway,
    ) -> Self {
        Self {
            cfg,
            pool,
            cache,
            gateway,
            warm: Mutex::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    // ============ Upload ============

    /// Ingest one document: returns the immutable record.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_hint: Option<&str>,
    ) -> Result<Document> {
        let size = bytes.len() as u64;
        let limit = self.cfg.max_file_size_bytes();
        if size > limit {
            return Err(EngineError::Oversize { size, limit });
        }

        // Decode, count, classify, and chunk off the async scheduler;
        // these run well past the point where blocking would hurt.
        let filename_owned = filename.to_string();
        let mime_owned = mime_hint.map(|m| m.to_string());
        let tiers = self.cfg.tiers.clone();
        let chunking = self.cfg.chunking.clone();
        let (loaded, token_count, doc_tier, chunks) =
            tokio::task::spawn_blocking(move || -> Result<_> {
                let loaded = loader::load(&bytes, &filename_owned, mime_owned.as_deref())?;
                let token_count = tokenizer::count(&loaded.text);
                let doc_tier = tier::classify(token_count, &tiers);
                let chunks = if doc_tier >= Tier::T3 {
                    chunker::chunk_text(&loaded.text, &chunking)
                } else {
                    Vec::new()
                };
                Ok((loaded, token_count, doc_tier, chunks))
            })
            .await
            .map_err(|e| EngineError::Internal(e.into()))??;

        let doc_id = Uuid::new_v4();
        let text_path = self.cfg.upload_dir.join(format!("{}.txt", doc_id));
        let doc = Document {
            id: doc_id,
            filename: filename.to_string(),
            file_size: size as i64,
            mime_type: loaded.mime_type.clone(),
            text_path: text_path.to_string_lossy().into_owned(),
            token_count: token_count as i64,
            tier: doc_tier,
            page_count: loaded.page_count.map(|n| n as i64),
            row_count: loaded.row_count.map(|n| n as i64),
            status: DocumentStatus::Ready,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.write_text_artifact(&text_path, &loaded.text).await {
            // The document parsed but cannot be persisted: record the
            // failure so the id is traceable, then surface the error.
            tracing::error!(doc_id = %doc_id, tier = doc.tier.as_u8(), phase = "persist-text",
                "canonical text write failed: {}", e);
            let failed = Document {
                status: DocumentStatus::Failed,
                ..doc
            };
            if let Err(store_err) = store::insert_document(&self.pool, &failed, &[]).await {
                tracing::error!(doc_id = %doc_id, "failed-document record not stored: {}", store_err);
            }
            return Err(EngineError::Internal(e));
        }

        // Tier-4 documents are embedded at upload; failures degrade to a
        // BM25-only artifact. Uploads carry no cancellation signal.
        let artifact = if doc_tier >= Tier::T3 {
            Some(
                self.build_from_chunks(&doc, chunks.clone(), &CancellationToken::new())
                    .await?,
            )
        } else {
            None
        };

        store::insert_document(&self.pool, &doc, &chunks).await?;

        if let Some(artifact) = artifact {
            let encoded = artifact.encode();
            self.cache.put(doc_id, &encoded).await;
            self.warm.lock().await.insert(doc_id, Arc::new(artifact));
        }

        tracing::info!(
            doc_id = %doc_id,
            tier = doc.tier.as_u8(),
            tokens = token_count,
            "document uploaded"
        );
        Ok(doc)
    }

    async fn write_text_artifact(
        &self,
        path: &std::path::Path,
        text: &str,
    ) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.cfg.upload_dir).await?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    // ============ Query ============

    /// Assemble a query-relevant, budget-bounded context for a document.
    pub async fn query(
        &self,
        doc_id: Uuid,
        query: &str,
        top_k: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        if query.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let doc = store::get_document(&self.pool, doc_id)
            .await?
            .ok_or(EngineError::DocumentNotFound(doc_id))?;
        if doc.status != DocumentStatus::Ready {
            return Err(EngineError::DocumentNotReady {
                id: doc_id,
                status: doc.status.as_str().to_string(),
            });
        }
        let top_k = top_k.unwrap_or(self.cfg.retrieval.top_k).max(1);
        check_cancel(cancel)?;

        let assemble = async {
            let context = match doc.tier {
                Tier::T1 => {
                    let text = self.read_text(&doc).await?;
                    assembler::assemble_tier1(&text, doc.token_count as usize, &self.cfg)
                }
                Tier::T2 => {
                    let text = self.read_text(&doc).await?;
                    check_cancel(cancel)?;
                    let query = query.to_string();
                    let cfg = self.cfg.clone();
                    tokio::task::spawn_blocking(move || {
                        assembler::assemble_tier2(&text, &query, top_k, &cfg)
                    })
                    .await
                    .map_err(|e| EngineError::Internal(e.into()))?
                }
                Tier::T3 => {
                    let artifact = self.load_or_build_index(&doc, cancel).await?;
                    check_cancel(cancel)?;
                    self.assemble_bm25(&artifact, query, top_k, Tier::T3)
                }
                Tier::T4 => {
                    let artifact = self.load_or_build_index(&doc, cancel).await?;
                    check_cancel(cancel)?;
                    self.assemble_vector(&doc, &artifact, query, top_k, cancel)
                        .await?
                }
            };
            Ok::<_, EngineError>(context)
        };

        let deadline = std::time::Duration::from_secs(self.cfg.assembler_timeout_secs);
        let context = tokio::time::timeout(deadline, assemble)
            .await
            .map_err(|_| {
                tracing::error!(doc_id = %doc_id, tier = doc.tier.as_u8(), phase = "assemble",
                    "assembly exceeded the {}s budget", self.cfg.assembler_timeout_secs);
                EngineError::Internal(anyhow::anyhow!(
                    "assembly exceeded the {}s budget",
                    self.cfg.assembler_timeout_secs
                ))
            })??;
        check_cancel(cancel)?;

        Ok(QueryOutcome {
            document: doc,
            context,
        })
    }

    fn assemble_bm25(
        &self,
        artifact: &IndexArtifact,
        query: &str,
        top_k: usize,
        tier: Tier,
    ) -> AssembledContext {
        let ranked = ranker::rank(
            &artifact.stats,
            query,
            self.cfg.retrieval.bm25_k1,
            self.cfg.retrieval.bm25_b,
        );
        assembler::assemble_ranked(&artifact.chunks, &ranked, top_k, tier, &self.cfg)
    }

    async fn assemble_vector(
        &self,
        doc: &Document,
        artifact: &IndexArtifact,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<AssembledContext> {
        let Some(embedder_id) = artifact.embedder.filter(|_| artifact.has_embeddings()) else {
            let mut out = self.assemble_bm25(artifact, query, top_k, Tier::T4);
            out.strategy_notes = format!(
                "Embeddings unavailable at build time; fell back to BM25 ranking. {}",
                out.strategy_notes
            );
            return Ok(out);
        };

        // The query must be embedded by the same backend that produced the
        // artifact, so dimensions never mix.
        let query_vec = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = self.gateway.embed_with(embedder_id, query) => result,
        };

        let query_vec = match query_vec {
            Ok(v) => v,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, tier = 4, phase = "query-embed",
                    "query embedding failed, degrading to BM25: {}", e);
                let mut out = self.assemble_bm25(artifact, query, top_k, Tier::T4);
                out.strategy_notes = format!(
                    "Recorded embedder unavailable at query time; fell back to BM25 ranking. {}",
                    out.strategy_notes
                );
                return Ok(out);
            }
        };

        // 3·top_k candidates, then the tier-3 greedy fill among them.
        let candidates = match vector::top_k(
            &artifact.matrix,
            artifact.dim,
            &query_vec,
            top_k.saturating_mul(3),
        ) {
            Ok(c) => c,
            Err(EngineError::DimensionMismatch { found, expected }) => {
                tracing::warn!(doc_id = %doc.id, tier = 4, phase = "vector-search",
                    "query dimension {} does not match artifact dimension {}; degrading to BM25",
                    found, expected);
                let mut out = self.assemble_bm25(artifact, query, top_k, Tier::T4);
                out.strategy_notes = format!(
                    "Embedding dimension mismatch; fell back to BM25 ranking. {}",
                    out.strategy_notes
                );
                return Ok(out);
            }
            Err(e) => return Err(e),
        };

        let mut out =
            assembler::assemble_ranked(&artifact.chunks, &candidates, top_k, Tier::T4, &self.cfg);
        out.strategy_notes = format!(
            "Vector similarity search over {} chunks retrieved {} candidates; {} fit within the token budget.{}",
            artifact.chunks.len(),
            candidates.len(),
            out.chunks_used.len(),
            match embedder_id {
                crate::artifact::EmbedderId::Primary => "",
                crate::artifact::EmbedderId::Fallback => " Embeddings from the fallback embedder.",
            }
        );
        Ok(out)
    }

    // ============ Index lifecycle ============

    /// Resolve a document's index artifact: warm map, then cache, then a
    /// single-flight build.
    async fn load_or_build_index(
        &self,
        doc: &Document,
        cancel: &CancellationToken,
    ) -> Result<Arc<IndexArtifact>> {
        let id = doc.id;

        if let Some(artifact) = self.warm.lock().await.get(&id) {
            return Ok(artifact.clone());
        }

        if let Some(bytes) = self.cache.get(id).await {
            match IndexArtifact::decode(&bytes) {
                Ok(artifact) if self.artifact_dims_current(&artifact) => {
                    let artifact = Arc::new(artifact);
                    self.warm.lock().await.insert(id, artifact.clone());
                    return Ok(artifact);
                }
                Ok(_) => {
                    tracing::warn!(doc_id = %id,
                        "cached artifact has a stale embedding dimension; rebuilding");
                }
                Err(e) => {
                    tracing::warn!(doc_id = %id, "cached artifact unreadable; rebuilding: {}", e);
                }
            }
        }

        // Single-flight: one build per document id; concurrent arrivals
        // queue on the same lock and find the warm entry afterwards.
        let build_lock = {
            let mut building = self.building.lock().await;
            building
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = build_lock.lock().await;

        if let Some(artifact) = self.warm.lock().await.get(&id) {
            return Ok(artifact.clone());
        }
        check_cancel(cancel)?;

        let built = self.build_index(doc, cancel).await;
        self.building.lock().await.remove(&id);
        let artifact = Arc::new(built?);
        // A cancelled build must leave no trace.
        check_cancel(cancel)?;

        // Cache write is best-effort and idempotent.
        self.cache.put(id, &artifact.encode()).await;
        self.warm.lock().await.insert(id, artifact.clone());
        Ok(artifact)
    }

    async fn build_index(
        &self,
        doc: &Document,
        cancel: &CancellationToken,
    ) -> Result<IndexArtifact> {
        let mut chunks = store::get_chunks(&self.pool, doc.id).await?;
        if chunks.is_empty() {
            // Chunk rows are durable for tier ≥ 3; rebuilding from the text
            // artifact covers a store restored from partial backups.
            let text = self.read_text(doc).await?;
            let chunking = self.cfg.chunking.clone();
            chunks = tokio::task::spawn_blocking(move || chunker::chunk_text(&text, &chunking))
                .await
                .map_err(|e| EngineError::Internal(e.into()))?;
        }
        check_cancel(cancel)?;

        self.build_from_chunks(doc, chunks, cancel).await
    }

    /// Build an artifact from a chunk list: BM25 statistics always, the
    /// embedding matrix for tier-4 documents when a backend cooperates.
    /// Only cancellation is an error; embedding failures degrade to a
    /// BM25-only artifact.
    async fn build_from_chunks(
        &self,
        doc: &Document,
        chunks: Vec<ChunkRecord>,
        cancel: &CancellationToken,
    ) -> Result<IndexArtifact> {
        let stats = ranker::build_stats(&chunks);

        let (matrix, dim, embedder) = if doc.tier == Tier::T4 {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embed_result = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.gateway.embed_documents(&texts) => result,
            };
            match embed_result {
                Ok((vectors, id)) => {
                    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
                    let mut matrix = Vec::with_capacity(vectors.len() * dim);
                    for v in &vectors {
                        matrix.extend_from_slice(v);
                    }
                    (matrix, dim, Some(id))
                }
                Err(e) => {
                    tracing::warn!(doc_id = %doc.id, tier = doc.tier.as_u8(), phase = "embed",
                        "embedding failed during index build; continuing BM25-only: {}", e);
                    (Vec::new(), 0, None)
                }
            }
        } else {
            (Vec::new(), 0, None)
        };

        Ok(IndexArtifact {
            embedder,
            dim,
            chunks,
            stats,
            matrix,
        })
    }

    /// A cached artifact is stale when its recorded backend is available
    /// with a different dimension (embedder upgrades, config changes).
    fn artifact_dims_current(&self, artifact: &IndexArtifact) -> bool {
        match artifact.embedder {
            Some(id) => match self.gateway.dims_of(id) {
                Some(dims) => dims == artifact.dim,
                // Backend gone: keep the artifact, queries degrade to BM25.
                None => true,
            },
            None => true,
        }
    }

    // ============ Record access ============

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        store::get_document(&self.pool, id)
            .await?
            .ok_or(EngineError::DocumentNotFound(id))
    }

    pub async fn list_documents(&self, limit: i64) -> Result<Vec<Document>> {
        store::list_documents(&self.pool, limit).await
    }

    /// Delete a document and cascade: chunk rows, cached artifact, warm
    /// entry, and the canonical-text file.
    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        let doc = self.get_document(id).await?;
        store::delete_document(&self.pool, id).await?;
        self.warm.lock().await.remove(&id);
        self.cache.delete(id).await;
        if let Err(e) = tokio::fs::remove_file(&doc.text_path).await {
            tracing::warn!(doc_id = %id, "text artifact not removed: {}", e);
        }
        tracing::info!(doc_id = %id, "document deleted");
        Ok(())
    }

    async fn read_text(&self, doc: &Document) -> Result<String> {
        tokio::fs::read_to_string(&doc.text_path)
            .await
            .map_err(|e| {
                tracing::error!(doc_id = %doc.id, tier = doc.tier.as_u8(), phase = "read-text",
                    "canonical text unreadable: {}", e);
                EngineError::Internal(anyhow::anyhow!(
                    "canonical text for {} unreadable: {}",
                    doc.id,
                    e
                ))
            })
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}
