use crate::embeddings::Embedder;
use crate::error::{IngestError, RagError};
use crate::models::{Chunk, EmbeddingPurpose, RetrievedChunk};
use std::cmp::Ordering;

/// Chunks of one document with their embeddings, index-aligned.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl ChunkIndex {
    pub fn new(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, IngestError> {
        if chunks.len() != vectors.len() {
            return Err(IngestError::InvalidArgument(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(Self { chunks, vectors })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let len = left.len().min(right.len());
    let mut dot = 0.0f32;
    let mut left_norm = 0.0f32;
    let mut right_norm = 0.0f32;

    for i in 0..len {
        dot += left[i] * right[i];
        left_norm += left[i] * left[i];
        right_norm += right[i] * right[i];
    }
    // norms include the tail of the longer vector
    left_norm += left[len..].iter().map(|value| value * value).sum::<f32>();
    right_norm += right[len..].iter().map(|value| value * value).sum::<f32>();

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Returns the `k` most similar chunks, best first. Equal scores keep corpus order.
pub fn top_k(query_vector: &[f32], index: &ChunkIndex, k: usize) -> Vec<RetrievedChunk> {
    let mut scored: Vec<(usize, f32)> = index
        .vectors
        .iter()
        .enumerate()
        .map(|(position, vector)| (position, cosine_similarity(query_vector, vector)))
        .collect();

    scored.sort_by(|left, right| {
        right
            .1
            .partial_cmp(&left.1)
            .unwrap_or(Ordering::Equal)
            .then(left.0.cmp(&right.0))
    });

    scored
        .into_iter()
        .take(k)
        .map(|(position, similarity)| {
            RetrievedChunk::new(index.chunks[position].clone(), similarity)
        })
        .collect()
}

pub async fn retrieve<E>(
    embedder: &E,
    query: &str,
    index: &ChunkIndex,
    k: usize,
) -> Result<Vec<RetrievedChunk>, RagError>
where
    E: Embedder + ?Sized,
{
    if index.is_empty() {
        tracing::warn!("no document chunks available for retrieval");
        return Ok(Vec::new());
    }

    let query_vector = embedder.embed(query, EmbeddingPurpose::Query).await?;
    let hits = top_k(&query_vector, index, k);
    tracing::debug!(
        query,
        requested = k,
        returned = hits.len(),
        best = hits.first().map(|hit| hit.similarity),
        "retrieved chunks"
    );
    Ok(hits)
}
