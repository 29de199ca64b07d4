//! Embedding capability and vector distance math.
//!
//! The store does not bundle an embedding model. Callers supply any
//! [`Embedder`] implementation; the store only requires that the same
//! embedder is used for writes and queries.

use async_trait::async_trait;

use siteminer_shared::Result;

/// Capability trait for turning text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Local embedder: feature-hashed bag of words, L2-normalized.
///
/// No model download and no network. Lexical overlap maps to proximity,
/// which is enough for ranking chunks of the same site against a question.
pub struct FeatureHashEmbedder {
    dim: usize,
}

impl FeatureHashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for FeatureHashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

// FNV-1a, stable across runs (unlike std's default hasher).
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for FeatureHashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let token = token.to_lowercase();
            let hash = fnv1a(&token);
            let index = (hash % self.dim as u64) as usize;
            // Second hash bit picks the sign to reduce collision bias.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance: `1 - cosine_similarity`, so lower is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![0.5, 0.2, 0.8];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_distance_one() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_yield_zero_similarity() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn feature_hash_embedder_is_deterministic_and_normalized() {
        let embedder = FeatureHashEmbedder::default();
        let a = embedder.embed("shipping and returns policy").await.unwrap();
        let b = embedder.embed("shipping and returns policy").await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_texts_are_closer_than_disjoint_ones() {
        let embedder = FeatureHashEmbedder::default();
        let question = embedder.embed("what is the shipping policy").await.unwrap();
        let related = embedder
            .embed("our shipping policy covers all orders")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("quarterly revenue grew nine percent")
            .await
            .unwrap();

        assert!(
            cosine_distance(&question, &related) < cosine_distance(&question, &unrelated)
        );
    }
}
