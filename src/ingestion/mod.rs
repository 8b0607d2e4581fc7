//! Document ingestion: chunk, embed, project, upsert.
//!
//! Callers hand in already-extracted document text; ingestion cuts it with
//! the shared [`ChunkingParams`], embeds the chunks in sequential batches,
//! projects every vector to the store's fixed width, and upserts records
//! whose ids follow the `<documentBaseName>-chunk-<index>` convention.
//! Record metadata carries the verbatim chunk text, source file, and chunk
//! index so retrieval can resolve matches back to their source.

use serde_json::{Map, Value, json};

use crate::chunking::ChunkingParams;
use crate::projection::project;
use crate::providers::EmbeddingProvider;
use crate::stores::{VectorRecord, VectorStore, chunk_record_id};
use crate::types::PipelineError;

/// Metadata key holding the verbatim chunk text.
pub const META_TEXT: &str = "text";
/// Metadata key holding the source file name.
pub const META_SOURCE_FILE: &str = "source_file";
/// Metadata key holding the zero-based chunk index.
pub const META_CHUNK_INDEX: &str = "chunk_index";

/// Summary of one ingestion run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestionReport {
    /// Chunks embedded and upserted.
    pub chunks: usize,
    /// Embedding/upsert batches issued.
    pub batches: usize,
    /// Store width every vector was projected to.
    pub dimension: usize,
}

/// Ingests one document into the vector store.
///
/// Batches are processed strictly in sequence, never concurrently. The base
/// name for record ids is `source_file` without its extension. Extra
/// metadata fields are copied into every record; the reserved keys
/// ([`META_TEXT`], [`META_SOURCE_FILE`], [`META_CHUNK_INDEX`]) always win.
pub async fn ingest_document(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    source_file: &str,
    text: &str,
    params: ChunkingParams,
    batch_size: usize,
    extra_metadata: &Map<String, Value>,
) -> Result<IngestionReport, PipelineError> {
    let chunks = params.chunk(text)?;
    if chunks.is_empty() {
        return Ok(IngestionReport {
            chunks: 0,
            batches: 0,
            dimension: store.dimension(),
        });
    }

    let base_name = base_name(source_file);
    let dimension = store.dimension();
    let batch_size = batch_size.max(1);
    let mut batches = 0usize;

    for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(PipelineError::Embedding(format!(
                "expected {} vectors for batch, received {}",
                batch.len(),
                vectors.len()
            )));
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(offset, (chunk, vector))| {
                let chunk_index = batch_number * batch_size + offset;
                let mut metadata = extra_metadata.clone();
                metadata.insert(META_TEXT.to_string(), json!(chunk));
                metadata.insert(META_SOURCE_FILE.to_string(), json!(source_file));
                metadata.insert(META_CHUNK_INDEX.to_string(), json!(chunk_index));
                VectorRecord::new(
                    chunk_record_id(&base_name, chunk_index),
                    project(&vector, dimension),
                    Value::Object(metadata),
                )
            })
            .collect();

        store.upsert(records).await?;
        batches += 1;
    }

    tracing::info!(
        source = source_file,
        chunks = chunks.len(),
        batches,
        dimension,
        "document ingested"
    );

    Ok(IngestionReport {
        chunks: chunks.len(),
        batches,
        dimension,
    })
}

/// File name without its last extension: `manual.txt` becomes `manual`.
pub fn base_name(source_file: &str) -> String {
    std::path::Path::new(source_file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_file.to_string())
}
