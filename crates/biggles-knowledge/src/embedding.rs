use async_trait::async_trait;
use biggles_core::{BigglesError, BigglesResult};
use std::collections::HashMap;

/// Trait for computing text embeddings (vector representations).
///
/// Configuring one on a [`crate::KnowledgeStore`] switches its search into
/// vector mode.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for a single text.
    async fn embed(&self, text: &str) -> BigglesResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> BigglesResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Fixed length of every vector this provider returns.
    fn dimension(&self) -> usize;
}

/// Hashing bag-of-words embedding that needs no model or network.
///
/// Each term's frequency is scattered into two buckets with a hash-derived
/// sign, then the vector is L2-normalised. Deterministic across runs.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> BigglesResult<Vec<f32>> {
        let terms = tokenize(text);
        if terms.is_empty() {
            return Err(BigglesError::Provider(
                "cannot embed text without terms".to_string(),
            ));
        }

        let mut counts: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            *counts.entry(term.as_str()).or_insert(0.0) += 1.0;
        }

        let total = terms.len() as f32;
        let mut vector = vec![0.0f32; self.dimension];
        for (term, count) in counts {
            let weight = count / total;
            let primary = fnv1a(term.as_bytes(), 0);
            let secondary = fnv1a(term.as_bytes(), 0x9e37_79b9);
            let sign = if primary & 1 == 0 { 1.0 } else { -1.0 };
            vector[(primary as usize >> 1) % self.dimension] += sign * weight;
            vector[secondary as usize % self.dimension] += 0.5 * weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Lower-cased alphanumeric terms longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn fnv1a(data: &[u8], seed: u32) -> u32 {
    let mut hash: u32 = 2_166_136_261 ^ seed;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
