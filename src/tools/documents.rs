//! Document retrieval over locally embedded chunks

use super::ToolError;
use crate::api::Embedder;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const EMBED_BATCH: usize = 32;

/// Splits text into overlapping character windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ToolError> {
        if chunk_size == 0 {
            return Err(ToolError::InvalidArguments(
                "chunk_size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ToolError::InvalidArguments(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Windows of at most `chunk_size` chars. A window ends at a paragraph
    /// break or whitespace when one falls in its second half.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());
            let end = if hard_end == chars.len() {
                hard_end
            } else {
                Self::boundary(&chars, start, hard_end)
            };

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            if end == chars.len() {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }

    fn boundary(chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + (hard_end - start) / 2;

        let paragraph = (floor.max(start + 2)..=hard_end)
            .rev()
            .find(|&i| chars[i - 1] == '\n' && chars[i - 2] == '\n');
        if let Some(i) = paragraph {
            return i;
        }

        (floor.max(start + 1)..=hard_end)
            .rev()
            .find(|&i| chars[i - 1].is_whitespace())
            .unwrap_or(hard_end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub source: String,
    pub index: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    pub score: f32,
}

impl fmt::Display for SearchHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.3}] {} (chunk {})\n{}",
            self.score, self.chunk.source, self.chunk.index, self.chunk.content
        )
    }
}

/// Cosine similarity; zero-length vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// In-memory chunk list searched by brute-force cosine similarity
pub struct DocumentIndex {
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    entries: Vec<(DocumentChunk, Vec<f32>)>,
}

impl DocumentIndex {
    pub fn new(embedder: Arc<dyn Embedder>, splitter: TextSplitter) -> Self {
        Self {
            embedder,
            splitter,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct sources in insertion order
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for (chunk, _) in &self.entries {
            if !sources.contains(&chunk.source.as_str()) {
                sources.push(&chunk.source);
            }
        }
        sources
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ToolError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(EMBED_BATCH) {
            let embedded = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| ToolError::Retrieval(format!("embedding failed: {}", e)))?;
            if embedded.len() != batch.len() {
                return Err(ToolError::Retrieval(format!(
                    "embedder returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Chunk and embed a document. Re-adding a source replaces its chunks.
    pub async fn add_document(&mut self, source: &str, text: &str) -> Result<usize, ToolError> {
        let pieces = self.splitter.split(text);
        if pieces.is_empty() {
            return Err(ToolError::Retrieval(format!("{} has no text to index", source)));
        }

        let vectors = self.embed(pieces.clone()).await?;
        self.entries.retain(|(chunk, _)| chunk.source != source);

        let count = pieces.len();
        for (index, (content, vector)) in pieces.into_iter().zip(vectors).enumerate() {
            self.entries.push((
                DocumentChunk {
                    chunk_id: format!("{}#{}", source, index),
                    source: source.to_string(),
                    index,
                    content,
                },
                vector,
            ));
        }

        info!(source = %source, chunks = count, "Indexed document");
        Ok(count)
    }

    /// Index a UTF-8 text file under its path
    pub async fn add_file(&mut self, path: &Path) -> Result<usize, ToolError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::Retrieval(format!("{}: {}", path.display(), e)))?;
        self.add_document(&path.display().to_string(), &text).await
    }

    /// The `top_k` chunks most similar to the query, best first
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
        }
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embed(vec![query.to_string()])
            .await?
            .pop()
            .unwrap_or_default();

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .map(|(chunk, vector)| SearchHit {
                chunk: chunk.clone(),
                score: cosine_similarity(&query_vector, vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);

        debug!(query = %query, hits = hits.len(), "Searched documents");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LetterEmbedder;

    #[test]
    fn test_splitter_rejects_bad_sizes() {
        assert!(TextSplitter::new(0, 0).is_err());
        assert!(TextSplitter::new(10, 10).is_err());
        assert!(TextSplitter::new(10, 2).is_ok());
    }

    #[test]
    fn test_split_respects_size_and_overlap() {
        let splitter = TextSplitter::new(20, 5).unwrap();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = splitter.split(text);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert!(chunks.last().unwrap().ends_with("kappa"));
        for word in text.split_whitespace() {
            assert!(chunks.iter().any(|c| c.contains(word)), "lost {}", word);
        }
    }

    #[test]
    fn test_split_prefers_paragraph_breaks() {
        let splitter = TextSplitter::new(40, 0).unwrap();
        let chunks = splitter.split("Valve procedure step one.\n\nPump procedure step two.");
        assert_eq!(chunks[0], "Valve procedure step one.");
        assert_eq!(chunks[1], "Pump procedure step two.");
    }

    #[test]
    fn test_split_short_and_multibyte() {
        let splitter = TextSplitter::new(8, 2).unwrap();
        assert_eq!(splitter.split("°C ok"), vec!["°C ok"]);
        assert!(splitter.split("   ").is_empty());
        let chunks = splitter.split("ÄÖÜäöüßÄÖÜäöüß");
        assert!(chunks.iter().all(|c| c.chars().count() <= 8));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_chunk_first() {
        let mut index = DocumentIndex::new(Arc::new(LetterEmbedder), TextSplitter::new(200, 20).unwrap());
        index.add_document("valves.md", "open the valve slowly").await.unwrap();
        index.add_document("xyz.md", "zzz yyy xxx zzz").await.unwrap();

        let hits = index.search("valve open", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source, "valves.md");
    }

    #[tokio::test]
    async fn test_readding_source_replaces_chunks() {
        let mut index = DocumentIndex::new(Arc::new(LetterEmbedder), TextSplitter::new(200, 20).unwrap());
        index.add_document("a.md", "first version").await.unwrap();
        index.add_document("a.md", "second version").await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.sources(), vec!["a.md"]);
        assert!(index.search("anything", 0).await.unwrap().is_empty());
        assert!(index.search("  ", 3).await.is_err());
    }
}
