//! Flat cosine-similarity index over chunk embeddings.
//!
//! Vectors are L2-normalized at build time, so similarity is a plain dot
//! product. Search is exact over the full matrix; at the scale of one
//! document's chunks no approximate structure is warranted.

use crate::error::{EngineError, Result};

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Exact top-k search over a row-major `N×dim` matrix.
///
/// Returns `(row, score)` pairs sorted by descending score, ascending row
/// on ties. Scores are cosine similarities in `[-1, 1]` when both sides
/// are normalized.
pub fn top_k(matrix: &[f32], dim: usize, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
    if query.len() != dim {
        return Err(EngineError::DimensionMismatch {
            found: query.len(),
            expected: dim,
        });
    }
    if dim == 0 || matrix.is_empty() {
        return Ok(Vec::new());
    }

    let rows = matrix.len() / dim;
    let mut scored: Vec<(usize, f32)> = (0..rows)
        .map(|row| {
            let start = row * dim;
            let dot = matrix[start..start + dim]
                .iter()
                .zip(query)
                .map(|(a, b)| a * b)
                .sum::<f32>();
            (row, dot)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_top_k_finds_nearest_rows() {
        // Three unit vectors along the axes.
        let matrix = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let hits = top_k(&matrix, 3, &[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_scores_bounded_for_normalized_input() {
        let mut matrix = vec![0.2, -0.7, 0.4, 0.9, 0.1, -0.3];
        for row in matrix.chunks_mut(3) {
            normalize(row);
        }
        let mut q = vec![0.5, 0.5, -0.5];
        normalize(&mut q);
        for (_, score) in top_k(&matrix, 3, &q, 10).unwrap() {
            assert!((-1.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let matrix = vec![1.0, 0.0];
        let err = top_k(&matrix, 2, &[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                found: 3,
                expected: 2
            }
        ));
    }

    #[test]
    fn test_tie_breaks_on_row_order() {
        let matrix = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let hits = top_k(&matrix, 2, &[1.0, 0.0], 3).unwrap();
        let rows: Vec<usize> = hits.iter().map(|(r, _)| *r).collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }
}
