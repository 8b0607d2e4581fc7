//! In-memory vector store with cosine similarity.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::types::PipelineError;

use super::{QueryMatch, VectorRecord, VectorStore};

/// Reference [`VectorStore`] backed by a `HashMap` behind a `RwLock`.
///
/// Enforces the fixed-dimension invariant on both upsert and query, which
/// mirrors how a managed index rejects mismatched widths.
#[derive(Debug)]
pub struct MemoryVectorStore {
    dimension: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), PipelineError> {
        for record in &records {
            if record.values.len() != self.dimension {
                return Err(PipelineError::Store(format!(
                    "record {} has width {}, index expects {}",
                    record.id,
                    record.values.len(),
                    self.dimension
                )));
            }
        }

        let mut guard = self.records.write();
        for record in records {
            guard.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, PipelineError> {
        if vector.len() != self.dimension {
            return Err(PipelineError::Store(format!(
                "query vector has width {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let guard = self.records.read();
        let mut matches: Vec<QueryMatch> = guard
            .values()
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: if include_metadata {
                    record.metadata.clone()
                } else {
                    Value::Null
                },
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
