//! Embedding gateway: primary provider with local fallback.
//!
//! The [`Embedder`] trait abstracts one backend; the [`EmbeddingGateway`]
//! owns up to two of them:
//!
//! - **primary**: the OpenAI embeddings API (`text-embedding-3-small`,
//!   1536-d), present only when `OPENAI_API_KEY` is configured;
//! - **fallback**: a local MiniLM-L6-v2 pipeline (384-d) behind the
//!   `local-embeddings-tract` feature, no network after model download.
//!
//! Document embedding tries the primary with bounded retries (3 attempts,
//! exponential backoff from 200 ms, jittered; retry on transport errors,
//! 429 and 5xx) and falls back on exhaustion. The chosen identity is
//! returned with the vectors and recorded in the index artifact, so query
//! embedding can use the same backend and dimensions are never mixed.
//!
//! All vectors leaving the gateway are L2-normalized.

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::EmbedderId;
use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};
use crate::vector;

/// One embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded for diagnostics.
    fn model_name(&self) -> &str;
    /// Output dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Primary + fallback pair with identity tracking.
pub struct EmbeddingGateway {
    primary: Option<Arc<dyn Embedder>>,
    fallback: Option<Arc<dyn Embedder>>,
}

impl EmbeddingGateway {
    /// Assemble the gateway from configuration: OpenAI when a credential is
    /// present, the local model when its feature is compiled in.
    pub fn from_config(cfg: &EmbeddingConfig) -> Self {
        let primary: Option<Arc<dyn Embedder>> = match OpenAiEmbedder::new(cfg) {
            Ok(Some(p)) => Some(Arc::new(p)),
            Ok(None) => {
                tracing::info!("no OPENAI_API_KEY configured; embedding uses the local fallback");
                None
            }
            Err(e) => {
                tracing::warn!("primary embedder unavailable: {}", e);
                None
            }
        };

        #[cfg(feature = "local-embeddings-tract")]
        let fallback: Option<Arc<dyn Embedder>> =
            Some(Arc::new(local_tract::LocalEmbedder::new()));
        #[cfg(not(feature = "local-embeddings-tract"))]
        let fallback: Option<Arc<dyn Embedder>> = None;

        Self { primary, fallback }
    }

    /// Inject specific backends (tests, alternative providers).
    pub fn with_backends(
        primary: Option<Arc<dyn Embedder>>,
        fallback: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self { primary, fallback }
    }

    pub fn backend(&self, id: EmbedderId) -> Option<&Arc<dyn Embedder>> {
        match id {
            EmbedderId::Primary => self.primary.as_ref(),
            EmbedderId::Fallback => self.fallback.as_ref(),
        }
    }

    /// Expected dimensionality for a recorded identity, if that backend is
    /// still available.
    pub fn dims_of(&self, id: EmbedderId) -> Option<usize> {
        self.backend(id).map(|b| b.dims())
    }

    /// Embed document chunks: primary first, fallback on failure. Returns
    /// the vectors with the identity that produced them.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, EmbedderId)> {
        let mut primary_err = None;
        if let Some(primary) = &self.primary {
            match primary.embed(texts).await {
                Ok(vectors) => return Ok((normalize_all(vectors), EmbedderId::Primary)),
                Err(e) => {
                    tracing::warn!("primary embedder failed, trying fallback: {}", e);
                    primary_err = Some(e);
                }
            }
        }
        if let Some(fallback) = &self.fallback {
            match fallback.embed(texts).await {
                Ok(vectors) => return Ok((normalize_all(vectors), EmbedderId::Fallback)),
                Err(e) => {
                    return Err(EngineError::EmbedderUnavailable(match primary_err {
                        Some(p) => format!("primary: {}; fallback: {}", p, e),
                        None => format!("fallback: {}", e),
                    }))
                }
            }
        }
        Err(EngineError::EmbedderUnavailable(match primary_err {
            Some(p) => format!("primary failed ({}) and no fallback is compiled in", p),
            None => "no embedding backend configured".to_string(),
        }))
    }

    /// Embed a query with a specific recorded identity. Used at query time
    /// so the vector matches the artifact's dimension.
    pub async fn embed_with(&self, id: EmbedderId, text: &str) -> Result<Vec<f32>> {
        let backend = self.backend(id).ok_or_else(|| {
            EngineError::EmbedderUnavailable(format!("{} embedder is not available", id.as_str()))
        })?;
        let vectors = backend
            .embed(&[text.to_string()])
            .await
            .map_err(EngineError::Internal)?;
        let mut vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal(anyhow!("empty embedding response")))?;
        vector::normalize(&mut vector);
        Ok(vector)
    }
}

fn normalize_all(mut vectors: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    for v in &mut vectors {
        vector::normalize(v);
    }
    vectors
}

// ============ OpenAI (primary) ============

/// OpenAI embeddings API backend with batching, retry, and backoff.
pub struct OpenAiEmbedder {
    api_key: String,
    model: String,
    dims: usize,
    max_attempts: u32,
    initial_backoff_ms: u64,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    /// `Ok(None)` when no credential is configured.
    pub fn new(cfg: &EmbeddingConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = cfg.openai_api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Some(Self {
            api_key,
            model: cfg.openai_model.clone(),
            dims: cfg.openai_dims,
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff_ms: cfg.initial_backoff_ms,
            client,
        }))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.initial_backoff_ms, attempt)).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json, self.dims);
                    }
                    // Rate limited or server error: retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }
                    // Other client errors don't retry.
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }
}

/// Exponential backoff from `initial_ms`, ±50% jitter.
fn backoff_delay(initial_ms: u64, attempt: u32) -> Duration {
    let base = initial_ms.saturating_mul(1 << (attempt - 1).min(8));
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((base as f64 * jitter) as u64)
}

fn parse_openai_response(json: &serde_json::Value, dims: usize) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid OpenAI response: missing embedding"))?;
        if embedding.len() != dims {
            bail!(
                "invalid OpenAI response: got {} dims, expected {}",
                embedding.len(),
                dims
            );
        }
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticEmbedder {
        dims: usize,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for StaticEmbedder {
        fn model_name(&self) -> &str {
            "static"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("backend down");
            }
            Ok(texts.iter().map(|_| vec![3.0; self.dims]).collect())
        }
    }

    fn backend(dims: usize, fail: bool) -> Arc<StaticEmbedder> {
        Arc::new(StaticEmbedder {
            dims,
            fail,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_primary_used_when_healthy() {
        let primary = backend(4, false);
        let fallback = backend(2, false);
        let gw =
            EmbeddingGateway::with_backends(Some(primary.clone()), Some(fallback.clone()));
        let (vectors, id) = gw.embed_documents(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(id, EmbedderId::Primary);
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 4);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_primary_failure() {
        let gw = EmbeddingGateway::with_backends(Some(backend(4, true)), Some(backend(2, false)));
        let (vectors, id) = gw.embed_documents(&["a".into()]).await.unwrap();
        assert_eq!(id, EmbedderId::Fallback);
        assert_eq!(vectors[0].len(), 2);
    }

    #[tokio::test]
    async fn test_both_failing_is_unavailable() {
        let gw = EmbeddingGateway::with_backends(Some(backend(4, true)), Some(backend(2, true)));
        let err = gw.embed_documents(&["a".into()]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmbedderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_vectors_are_normalized() {
        let gw = EmbeddingGateway::with_backends(Some(backend(3, false)), None);
        let (vectors, _) = gw.embed_documents(&["a".into()]).await.unwrap();
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_embed_with_missing_backend() {
        let gw = EmbeddingGateway::with_backends(None, Some(backend(2, false)));
        let err = gw
            .embed_with(EmbedderId::Primary, "query")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbedderUnavailable(_)));
        let v = gw.embed_with(EmbedderId::Fallback, "query").await.unwrap();
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let a1 = backoff_delay(200, 1);
        let a3 = backoff_delay(200, 3);
        assert!(a1 >= Duration::from_millis(100) && a1 <= Duration::from_millis(300));
        assert!(a3 >= Duration::from_millis(400) && a3 <= Duration::from_millis(1200));
    }

    #[test]
    fn test_parse_openai_response_shape() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [1.0, 0.0]},
                {"embedding": [0.0, 1.0]}
            ]
        });
        let vectors = parse_openai_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&json, 3).is_err());
        assert!(parse_openai_response(&serde_json::json!({}), 2).is_err());
    }
}
