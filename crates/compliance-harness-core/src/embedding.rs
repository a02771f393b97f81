//! Vector similarity and chunk ranking.
//!
//! Pure helpers used by the local-index retrieval strategy: cosine
//! similarity between embedding vectors and a ranker that scores every
//! cached chunk against a query vector.
//!
//! Embedding computation itself lives behind the inference client in the
//! `compliance-harness` app crate.

use std::cmp::Ordering;

use crate::models::{DocumentChunk, RankedChunk};

/// Added to the norm product so a zero-norm vector scores 0 instead of NaN.
pub const COSINE_EPSILON: f64 = 1e-9;

/// Compute cosine similarity between two embedding vectors.
///
/// `dot(a, b) / (‖a‖·‖b‖ + ε)`, accumulated in `f64`. Returns a value in
/// roughly `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal, or either vector has zero norm
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
/// Non-finite inputs propagate as a non-finite score; [`rank_chunks`]
/// drops those.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)
}

/// Score every chunk against `query`, drop non-finite scores, sort by score
/// descending (ties keep input order) and keep the best `top_k`.
pub fn rank_chunks<'a, I>(query: &[f32], chunks: I, top_k: usize) -> Vec<RankedChunk>
where
    I: IntoIterator<Item = &'a DocumentChunk>,
{
    let mut ranked: Vec<RankedChunk> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let score = cosine_similarity(query, &chunk.embedding);
            score.is_finite().then(|| RankedChunk {
                chunk: chunk.clone(),
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}
