//! In-memory vector index
//!
//! Documents are chunked with overlap, embedded in batches, and kept in RAM
//! for the lifetime of the pipeline. Retrieval is cosine top-k; answer
//! synthesis wraps the retrieved chunks in a grounding prompt and hands them
//! to the shared chat client.

use crate::core::error::PluginError;
use crate::core::llm::ChatClient;
use crate::core::plugin::{PipeOutput, PipeStream};
use crate::models::chat::ChatMessage;
use crate::rag::embeddings::EmbeddingClient;
use tracing::{info, warn};

/// A unit of source material: one file, one issue, one article
#[derive(Debug, Clone)]
pub struct Document {
    /// Where the text came from (path, issue ref)
    pub source: String,
    pub text: String,
}

/// One embedded chunk of a document
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub source: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Split documents into character chunks with overlap, respecting UTF-8
/// boundaries. Overlap must be smaller than the chunk size.
pub fn chunk_documents(
    documents: &[Document],
    chunk_size: usize,
    overlap: usize,
) -> Vec<(String, String)> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();

    for doc in documents {
        let chars: Vec<char> = doc.text.chars().collect();
        if chars.is_empty() {
            continue;
        }
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                chunks.push((doc.source.clone(), piece));
            }
            if end == chars.len() {
                break;
            }
            start = end - overlap;
        }
    }

    chunks
}

/// Cosine similarity between two vectors; zero for degenerate input
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Chunk, embed, and index a document set
    pub async fn build(
        documents: &[Document],
        embedder: &EmbeddingClient,
        chunk_size: usize,
        chunk_overlap: usize,
        batch_size: usize,
    ) -> Result<Self, PluginError> {
        let pieces = chunk_documents(documents, chunk_size, chunk_overlap);
        info!(
            "Vectorizing {} chunks from {} documents",
            pieces.len(),
            documents.len()
        );

        let mut chunks = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(PluginError::Unexpected(format!(
                    "embedding count mismatch: sent {}, received {}",
                    batch.len(),
                    embeddings.len()
                )));
            }
            for ((source, text), embedding) in batch.iter().cloned().zip(embeddings) {
                chunks.push(IndexedChunk {
                    source,
                    text,
                    embedding,
                });
            }
        }

        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The k most similar chunks to the query embedding, best first
    pub fn top_k(&self, query_embedding: &[f32], k: usize) -> Vec<&IndexedChunk> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query_embedding, &chunk.embedding), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(_, chunk)| chunk).collect()
    }
}

/// Grounding prompt wrapping retrieved context around the user query
fn synthesis_messages(query: &str, context: &[&IndexedChunk]) -> Vec<ChatMessage> {
    let mut context_text = String::new();
    for chunk in context {
        context_text.push_str(&format!("--- {} ---\n{}\n\n", chunk.source, chunk.text));
    }

    vec![
        ChatMessage::system(
            "You answer questions using only the provided context. \
             If the context does not contain the answer, say so.",
        ),
        ChatMessage::user(format!(
            "Context information is below.\n\
             ---------------------\n{}---------------------\n\
             Given the context information and not prior knowledge, \
             answer the query.\nQuery: {}",
            context_text, query
        )),
    ]
}

/// Retrieve and answer: embed the query, pull top-k chunks, ask the chat model
pub async fn query_index(
    index: &VectorIndex,
    query: &str,
    embedder: &EmbeddingClient,
    chat: &ChatClient,
    model: &str,
    top_k: usize,
    streaming: bool,
) -> Result<PipeOutput, PluginError> {
    if index.is_empty() {
        warn!("query against an empty vector index");
        return Ok(PipeOutput::Text(
            "Error: knowledge base is empty".to_string(),
        ));
    }

    let query_embedding = embedder.embed(query).await?;
    let context = index.top_k(&query_embedding, top_k.max(1));
    let messages = synthesis_messages(query, &context);

    if streaming {
        let stream: PipeStream = chat.complete_stream(model, &messages, None).await?;
        Ok(PipeOutput::Stream(stream))
    } else {
        let answer = chat.complete(model, &messages, None, None).await?;
        Ok(PipeOutput::Text(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, text: &str) -> Document {
        Document {
            source: source.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_chunking_with_overlap() {
        let docs = vec![doc("a.rs", &"x".repeat(250))];
        let chunks = chunk_documents(&docs, 100, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1.len(), 100);
        assert_eq!(chunks[1].1.len(), 100);
        // last chunk starts at 160 and runs to 250
        assert_eq!(chunks[2].1.len(), 90);
    }

    #[test]
    fn test_chunking_skips_blank_documents() {
        let docs = vec![doc("empty", ""), doc("blank", "   \n  ")];
        assert!(chunk_documents(&docs, 100, 10).is_empty());
    }

    #[test]
    fn test_cosine_similarity_ranks_aligned_vectors_first() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) > 0.99);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_top_k_ordering() {
        let index = VectorIndex {
            chunks: vec![
                IndexedChunk {
                    source: "far".into(),
                    text: "far".into(),
                    embedding: vec![0.0, 1.0],
                },
                IndexedChunk {
                    source: "near".into(),
                    text: "near".into(),
                    embedding: vec![1.0, 0.1],
                },
            ],
        };
        let hits = index.top_k(&[1.0, 0.0], 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "near");
    }

    #[test]
    fn test_synthesis_prompt_carries_sources() {
        let chunk = IndexedChunk {
            source: "src/lib.rs".into(),
            text: "pub fn answer() {}".into(),
            embedding: vec![],
        };
        let messages = synthesis_messages("what is the answer?", &[&chunk]);
        assert_eq!(messages.len(), 2);
        let user = messages[1].content_text();
        assert!(user.contains("src/lib.rs"));
        assert!(user.contains("what is the answer?"));
    }
}
