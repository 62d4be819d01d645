use async_trait::async_trait;

use crate::error::{MemoryError, Result};

/// Produces a fixed-width embedding for a piece of text. No concrete model is
/// mandated by the spec; callers wire in whatever embedding backend they
/// have, the same way `LlmProvider` leaves the wire format open.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dims(&self) -> usize;
}

/// Deterministic locality-sensitive n-gram hashing embedder. Ships as the
/// default so retrieval tests are reproducible without a network call; a
/// real embedding model can be swapped in behind the same trait.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::Embedding("cannot embed empty text".to_string()));
        }
        let mut vec = vec![0f32; self.dims];
        let normalized = text.to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();
        let ngram_len = 3;
        if chars.len() < ngram_len {
            hash_into(&normalized, &mut vec, self.dims);
        } else {
            for window in chars.windows(ngram_len) {
                let gram: String = window.iter().collect();
                hash_into(&gram, &mut vec, self.dims);
            }
        }
        normalize(&mut vec);
        Ok(vec)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn hash_into(s: &str, out: &mut [f32], dims: usize) {
    let mut h: u64 = 1469598103934665603;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    let bucket = (h as usize) % dims;
    let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
    out[bucket] += sign;
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for
/// mismatched lengths or zero-norm inputs rather than panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_has_similarity_one() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("I live in Dublin").await.unwrap();
        let b = embedder.embed("I live in Dublin").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unrelated_text_has_lower_similarity() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("I live in Dublin").await.unwrap();
        let b = embedder.embed("the stock market crashed today").await.unwrap();
        let c = embedder.embed("I live in Cork").await.unwrap();
        assert!(cosine_similarity(&a, &c) > cosine_similarity(&a, &b));
    }
}
