//! Shared error type for the pipeline.

use thiserror::Error;

/// Errors produced by the retrieval-augmented generation pipeline.
///
/// Variants map to the failure domains of the pipeline stages: a
/// configuration failure is fatal before any work begins, stage failures
/// (embedding, store, generation) propagate to the orchestrator, and
/// telemetry failures are reported but never escalate past the submitter.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("chunking error: {0}")]
    Chunking(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
