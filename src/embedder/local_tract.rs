//! Local fallback embedder: MiniLM-L6-v2 over tract.
//!
//! Pure-Rust inference path: the ONNX model runs under tract and the
//! matching tokenizer comes from the `tokenizers` crate. Model files are
//! fetched from Hugging Face on first use and cached under
//! `~/.cache/sdch/models`; after that the backend is fully offline.
//! Inference runs inside `spawn_blocking` so it never stalls the I/O
//! scheduler.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

use super::Embedder;

const MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const MODEL_NAME: &str = "all-MiniLM-L6-v2";
const ONNX_PATH: &str = "onnx/model.onnx";
const TOKENIZER_PATH: &str = "tokenizer.json";
const DIMS: usize = 384;
const MAX_SEQ_LEN: usize = 256;
const BATCH_SIZE: usize = 32;

/// The fallback backend. Stateless between calls; the model is loaded per
/// batch run, which keeps memory flat when embeddings are rare.
pub struct LocalEmbedder;

impl LocalEmbedder {
    pub fn new() -> Self {
        LocalEmbedder
    }
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || run_inference(&texts)).await?
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base)
        .join(".cache")
        .join("sdch")
        .join("models")
        .join(MODEL_NAME);
    std::fs::create_dir_all(&dir).map_err(|e| anyhow!("create model cache dir: {}", e))?;
    Ok(dir)
}

fn fetch_to_cache(rel_path: &str, target: &Path) -> Result<()> {
    if target.exists() {
        return Ok(());
    }
    let url = format!(
        "https://huggingface.co/{}/resolve/main/{}",
        MODEL_REPO, rel_path
    );
    tracing::info!("downloading local embedding model file: {}", url);
    let resp = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| anyhow!("download {}: {}", url, e))?;
    let bytes = resp.bytes().map_err(|e| anyhow!("read body: {}", e))?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| anyhow!("create cache parent: {}", e))?;
    }
    std::fs::write(target, &bytes).map_err(|e| anyhow!("write cache: {}", e))?;
    Ok(())
}

fn ensure_model_files() -> Result<(PathBuf, PathBuf)> {
    let dir = cache_dir()?;
    let onnx = dir.join(ONNX_PATH);
    let tokenizer = dir.join(TOKENIZER_PATH);
    fetch_to_cache(ONNX_PATH, &onnx)?;
    fetch_to_cache(TOKENIZER_PATH, &tokenizer)?;
    Ok((onnx, tokenizer))
}

fn run_inference(texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let (onnx_path, tokenizer_path) = ensure_model_files()?;

    let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow!("load tokenizer: {}", e))?;

    let model = tract_onnx::onnx()
        .model_for_path(&onnx_path)
        .map_err(|e| anyhow!("load ONNX model: {}", e))?
        .into_optimized()
        .map_err(|e| anyhow!("optimize model: {}", e))?
        .into_runnable()
        .map_err(|e| anyhow!("build runnable model: {}", e))?;

    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(BATCH_SIZE) {
        let encodings: Vec<_> = batch
            .iter()
            .map(|text| {
                tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| anyhow!("tokenize: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .min(MAX_SEQ_LEN);
        let rows = encodings.len();

        let mut input_ids = vec![0i64; rows * seq_len];
        let mut attention_mask = vec![0i64; rows * seq_len];
        for (row, enc) in encodings.iter().enumerate() {
            for (col, &id) in enc.get_ids().iter().take(seq_len).enumerate() {
                input_ids[row * seq_len + col] = id as i64;
                attention_mask[row * seq_len + col] = 1;
            }
        }

        let ids_tensor: Tensor = ndarray::Array2::from_shape_vec((rows, seq_len), input_ids)
            .map_err(|e| anyhow!("input ids shape: {}", e))?
            .into();
        let mask_tensor: Tensor = ndarray::Array2::from_shape_vec((rows, seq_len), attention_mask)
            .map_err(|e| anyhow!("attention mask shape: {}", e))?
            .into();

        let outputs = model.run(tvec!(ids_tensor.into(), mask_tensor.into()))?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("model produced no output tensor"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| anyhow!("output tensor: {}", e))?;

        match view.shape() {
            // Already pooled: [batch, dims].
            &[n, _] => {
                for row in 0..n {
                    out.push(view.slice(ndarray::s![row, ..]).iter().copied().collect());
                }
            }
            // Last hidden state: [batch, seq, dims]; mean-pool over valid tokens.
            &[_, out_seq, _] => {
                for (row, enc) in encodings.iter().enumerate() {
                    let valid = enc.get_ids().len().min(out_seq).min(seq_len);
                    let mut pooled = vec![0f32; DIMS];
                    for col in 0..valid {
                        for (k, &v) in view.slice(ndarray::s![row, col, ..]).iter().enumerate() {
                            if k < DIMS {
                                pooled[k] += v;
                            }
                        }
                    }
                    if valid > 0 {
                        let inv = 1.0 / valid as f32;
                        for x in &mut pooled {
                            *x *= inv;
                        }
                    }
                    out.push(pooled);
                }
            }
            other => bail!("unexpected model output shape: {:?}", other),
        }
    }
    Ok(out)
}
