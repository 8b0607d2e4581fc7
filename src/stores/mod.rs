//! Vector store seam.
//!
//! The store is an external key-value index over fixed-width vectors with
//! attached metadata, supporting upsert and nearest-neighbor query. The
//! [`VectorStore`] trait is the only surface the pipeline depends on;
//! [`memory::MemoryVectorStore`] is the in-process reference implementation
//! used by tests and demos.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::PipelineError;

pub use memory::MemoryVectorStore;

/// One record in the index: id, fixed-width vector, and metadata.
///
/// Ids follow the `<documentBaseName>-chunk-<index>` convention so a record
/// can be traced back to its source chunk even without metadata. The vector
/// width must equal the store's configured dimension.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, values: Vec<f32>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            values,
            metadata,
        }
    }
}

/// One nearest-neighbor match. Higher `score` means more similar.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// Key-value vector index supporting upsert and top-k similarity query.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fixed vector width, set when the index was created.
    fn dimension(&self) -> usize;

    /// Inserts or replaces records by id. Every record's vector width must
    /// equal [`dimension`](Self::dimension).
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), PipelineError>;

    /// Returns up to `top_k` matches ordered most-similar first. Metadata is
    /// elided (null) when `include_metadata` is false.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, PipelineError>;
}

/// Builds a record id from a document base name and chunk index.
pub fn chunk_record_id(base_name: &str, chunk_index: usize) -> String {
    format!("{base_name}-chunk-{chunk_index}")
}

/// Recovers `(base_name, chunk_index)` from a `<base>-chunk-<index>` id.
pub fn parse_chunk_record_id(id: &str) -> Option<(&str, usize)> {
    let (base, index) = id.rsplit_once("-chunk-")?;
    if base.is_empty() {
        return None;
    }
    Some((base, index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_round_trip() {
        let id = chunk_record_id("manual", 7);
        assert_eq!(id, "manual-chunk-7");
        assert_eq!(parse_chunk_record_id(&id), Some(("manual", 7)));
    }

    #[test]
    fn base_names_containing_the_separator_still_parse() {
        // rsplit keeps the last separator, so earlier ones stay in the base.
        assert_eq!(
            parse_chunk_record_id("notes-chunk-old-chunk-3"),
            Some(("notes-chunk-old", 3))
        );
    }

    #[test]
    fn malformed_ids_do_not_parse() {
        assert_eq!(parse_chunk_record_id("no-separator"), None);
        assert_eq!(parse_chunk_record_id("doc-chunk-notanumber"), None);
        assert_eq!(parse_chunk_record_id("-chunk-2"), None);
    }
}
