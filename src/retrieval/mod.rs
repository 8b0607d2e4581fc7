//! Retrieval pipeline: embed the query, project it, query the store,
//! resolve matches back to source text.
//!
//! Embedding and store failures are fatal to the retrieval attempt and
//! propagate to the caller. Per-match content resolution is best-effort: a
//! match whose source chunk cannot be located or read degrades to an empty
//! content string rather than failing the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunking::ChunkingParams;
use crate::ingestion::{META_CHUNK_INDEX, META_SOURCE_FILE};
use crate::projection::project;
use crate::providers::EmbeddingProvider;
use crate::stores::{QueryMatch, VectorStore, parse_chunk_record_id};
use crate::trace::now_ms;
use crate::types::PipelineError;

/// One resolved match, highest similarity first in the outcome ordering.
#[derive(Clone, Debug)]
pub struct RetrievedMatch {
    pub id: String,
    pub score: f32,
    pub source_file: Option<String>,
    pub chunk_index: Option<usize>,
    /// Source chunk text; empty when resolution failed.
    pub content: String,
}

/// Observations from the query-embedding step, for span recording.
#[derive(Clone, Debug)]
pub struct QueryEmbedding {
    pub model: String,
    pub native_width: usize,
    pub projected_width: usize,
    /// The projected vector actually sent to the store.
    pub vector: Vec<f32>,
    pub started_at: i64,
    pub ended_at: i64,
}

/// Observations from the vector-store query, for span recording.
#[derive(Clone, Copy, Debug)]
pub struct StoreQuery {
    pub requested: usize,
    pub returned: usize,
    pub started_at: i64,
    pub ended_at: i64,
}

/// Result of one retrieval attempt.
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    pub matches: Vec<RetrievedMatch>,
    pub embedding: QueryEmbedding,
    pub store_query: StoreQuery,
}

/// Turns a prompt into ranked context snippets.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    docs_dir: PathBuf,
    params: ChunkingParams,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        docs_dir: impl Into<PathBuf>,
        params: ChunkingParams,
    ) -> Self {
        Self {
            embedder,
            store,
            docs_dir: docs_dir.into(),
            params,
        }
    }

    pub fn params(&self) -> ChunkingParams {
        self.params
    }

    /// Retrieves the `k` most similar chunks for `query`.
    ///
    /// The outcome carries timing and width observations for both network
    /// steps so callers can record truthful spans.
    pub async fn retrieve_top_k(
        &self,
        query: &str,
        k: usize,
    ) -> Result<RetrievalOutcome, PipelineError> {
        let inputs = vec![query.to_string()];

        let embed_started = now_ms();
        let mut vectors = self.embedder.embed(&inputs).await?;
        let embed_ended = now_ms();
        let native = vectors.pop().ok_or_else(|| {
            PipelineError::Embedding("provider returned no vector for the query".to_string())
        })?;

        let target_width = self.store.dimension();
        let projected = project(&native, target_width);
        let embedding = QueryEmbedding {
            model: self.embedder.model_name().to_string(),
            native_width: native.len(),
            projected_width: target_width,
            vector: projected,
            started_at: embed_started,
            ended_at: embed_ended,
        };

        let query_started = now_ms();
        let raw_matches = self.store.query(&embedding.vector, k, true).await?;
        let query_ended = now_ms();
        let store_query = StoreQuery {
            requested: k,
            returned: raw_matches.len(),
            started_at: query_started,
            ended_at: query_ended,
        };

        let mut matches = Vec::with_capacity(raw_matches.len());
        for raw in raw_matches {
            matches.push(self.resolve_match(raw).await);
        }

        tracing::debug!(
            requested = store_query.requested,
            returned = store_query.returned,
            native_width = embedding.native_width,
            projected_width = embedding.projected_width,
            "retrieval complete"
        );

        Ok(RetrievalOutcome {
            matches,
            embedding,
            store_query,
        })
    }

    async fn resolve_match(&self, raw: QueryMatch) -> RetrievedMatch {
        let source = self.parse_match_metadata(&raw).await;

        let content = match &source {
            Some((file_name, chunk_index)) => {
                let path = self.docs_dir.join(file_name);
                match read_chunk_content(&path, *chunk_index, self.params.max_size).await {
                    Ok(content) => content,
                    Err(err) => {
                        tracing::debug!(id = %raw.id, %err, "match content unresolved");
                        String::new()
                    }
                }
            }
            None => {
                tracing::debug!(id = %raw.id, "match carries no resolvable source");
                String::new()
            }
        };

        let (source_file, chunk_index) = match source {
            Some((file, index)) => (Some(file), Some(index)),
            None => (None, None),
        };

        RetrievedMatch {
            id: raw.id,
            score: raw.score,
            source_file,
            chunk_index,
            content,
        }
    }

    /// Recovers `(file_name, chunk_index)` for a match.
    ///
    /// Explicit metadata fields win; otherwise the record id is parsed as
    /// `<baseName>-chunk-<index>` and the base name is resolved against
    /// files under the documents directory by file stem.
    async fn parse_match_metadata(&self, raw: &QueryMatch) -> Option<(String, usize)> {
        let file = raw
            .metadata
            .get(META_SOURCE_FILE)
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let index = raw
            .metadata
            .get(META_CHUNK_INDEX)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        if let (Some(file), Some(index)) = (file, index) {
            return Some((file, index));
        }

        let (base, index) = parse_chunk_record_id(&raw.id)?;
        let file = self.find_document(base).await?;
        Some((file, index))
    }

    async fn find_document(&self, base: &str) -> Option<String> {
        let mut entries = tokio::fs::read_dir(&self.docs_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = Path::new(&name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            if stem.as_deref() == Some(base) {
                return Some(name);
            }
        }
        None
    }
}

/// Re-derives a chunk's text by slicing the whitespace-normalized document
/// at `[chunk_index * max_size, chunk_index * max_size + max_size)`.
///
/// Must use the same `max_size` the document was ingested with or the slice
/// misaligns; both sides take it from the shared [`ChunkingParams`].
/// An out-of-range index yields an empty string.
pub async fn read_chunk_content(
    path: &Path,
    chunk_index: usize,
    max_size: usize,
) -> Result<String, PipelineError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let normalized = normalize_whitespace(&raw);
    let chars: Vec<char> = normalized.chars().collect();

    let start = chunk_index.saturating_mul(max_size);
    if start >= chars.len() {
        return Ok(String::new());
    }
    let end = (start + max_size).min(chars.len());
    Ok(chars[start..end].iter().collect())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockEmbeddingProvider;
    use crate::stores::{MemoryVectorStore, VectorRecord, chunk_record_id};
    use serde_json::{Value, json};
    use tempfile::tempdir;

    async fn seeded_store(embedder: &MockEmbeddingProvider, texts: &[&str]) -> MemoryVectorStore {
        let store = MemoryVectorStore::new(4);
        let inputs: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&inputs).await.unwrap();
        let records = inputs
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| {
                VectorRecord::new(
                    chunk_record_id("doc", i),
                    project(&vector, 4),
                    json!({
                        META_SOURCE_FILE: "doc.txt",
                        META_CHUNK_INDEX: i,
                        "text": text,
                    }),
                )
            })
            .collect();
        store.upsert(records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn retrieval_ranks_and_resolves_matches() {
        let dir = tempdir().unwrap();
        let max_size = 20;
        // Document laid out so fixed windows of 20 chars are known.
        let document = "aaaa bbbb cccc dddd eeee ffff gggg hhhh";
        tokio::fs::write(dir.path().join("doc.txt"), document)
            .await
            .unwrap();

        let embedder = MockEmbeddingProvider::new(8);
        let store = seeded_store(&embedder, &["first chunk", "second chunk"]).await;
        let retriever = Retriever::new(
            Arc::new(embedder),
            Arc::new(store),
            dir.path(),
            ChunkingParams::new(max_size, 4),
        );

        let outcome = retriever.retrieve_top_k("first chunk", 2).await.unwrap();
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.store_query.requested, 2);
        assert_eq!(outcome.store_query.returned, 2);
        assert_eq!(outcome.embedding.native_width, 8);
        assert_eq!(outcome.embedding.projected_width, 4);
        assert_eq!(outcome.embedding.vector.len(), 4);
        assert!(outcome.matches[0].score >= outcome.matches[1].score);

        // Chunk 0 is the first 20 normalized characters.
        let first = outcome
            .matches
            .iter()
            .find(|m| m.chunk_index == Some(0))
            .unwrap();
        assert_eq!(first.content, "aaaa bbbb cccc dddd ");
        assert_eq!(first.source_file.as_deref(), Some("doc.txt"));
    }

    #[tokio::test]
    async fn id_convention_is_the_fallback_when_metadata_is_absent() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("doc.txt"), "zero one two three")
            .await
            .unwrap();

        let embedder = MockEmbeddingProvider::new(4);
        let store = MemoryVectorStore::new(4);
        let vectors = embedder.embed(&["anything".to_string()]).await.unwrap();
        store
            .upsert(vec![VectorRecord::new(
                chunk_record_id("doc", 0),
                vectors[0].clone(),
                Value::Null,
            )])
            .await
            .unwrap();

        let retriever = Retriever::new(
            Arc::new(embedder),
            Arc::new(store),
            dir.path(),
            ChunkingParams::new(9, 2),
        );
        let outcome = retriever.retrieve_top_k("anything", 1).await.unwrap();
        let m = &outcome.matches[0];
        assert_eq!(m.source_file.as_deref(), Some("doc.txt"));
        assert_eq!(m.chunk_index, Some(0));
        assert_eq!(m.content, "zero one ");
    }

    #[tokio::test]
    async fn unresolvable_matches_degrade_to_empty_content() {
        let dir = tempdir().unwrap();

        let embedder = MockEmbeddingProvider::new(4);
        let store = MemoryVectorStore::new(4);
        let vectors = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store
            .upsert(vec![
                // Names a file that does not exist.
                VectorRecord::new(
                    "ghost-chunk-1",
                    vectors[0].clone(),
                    json!({META_SOURCE_FILE: "ghost.txt", META_CHUNK_INDEX: 1}),
                ),
                // No metadata and no matching file on disk.
                VectorRecord::new("missing-chunk-0", vectors[1].clone(), Value::Null),
            ])
            .await
            .unwrap();

        let retriever = Retriever::new(
            Arc::new(embedder),
            Arc::new(store),
            dir.path(),
            ChunkingParams::default(),
        );
        let outcome = retriever.retrieve_top_k("a", 2).await.unwrap();
        assert_eq!(outcome.matches.len(), 2);
        for m in &outcome.matches {
            assert!(m.content.is_empty());
        }
    }

    #[tokio::test]
    async fn out_of_range_chunk_index_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.txt");
        tokio::fs::write(&path, "tiny").await.unwrap();
        let content = read_chunk_content(&path, 10, 100).await.unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn read_chunk_content_normalizes_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messy.txt");
        tokio::fs::write(&path, "alpha\n\n  beta\t gamma").await.unwrap();
        let content = read_chunk_content(&path, 0, 10).await.unwrap();
        assert_eq!(content, "alpha beta");
    }
}
