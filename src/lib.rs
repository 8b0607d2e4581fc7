//! ```text
//! Documents ──► chunking::chunk_text ──► providers::EmbeddingProvider
//!                                                 │
//!                              projection::project (native ──► index width)
//!                                                 │
//!                                  stores::VectorStore::upsert
//!
//! Question ──► config::ConfigCache (remote templates, one fetch)
//!           └─► retrieval::Retriever ──► ranked context snippets
//!                          │
//!          config::inject_variables ──► providers::ChatProvider
//!
//! Every stage ──► trace::Trace (spans, cost, tokens) ──► trace::TraceSubmitter
//! ```
//!
//! [`pipeline::Pipeline`] wires the stages together and threads one
//! [`trace::Trace`] through a run end to end.

pub mod chunking;
pub mod config;
pub mod ingestion;
pub mod pipeline;
pub mod projection;
pub mod providers;
pub mod retrieval;
pub mod stores;
pub mod trace;
pub mod types;

pub use chunking::{ChunkingParams, chunk_text};
pub use config::{ConfigCache, ConfigClient, DeploymentConfig, inject_variables};
pub use pipeline::{Pipeline, PipelineOptions, PipelineOutcome};
pub use projection::project;
pub use providers::{ChatMessage, ChatProvider, EmbeddingProvider};
pub use retrieval::{RetrievalOutcome, RetrievedMatch, Retriever};
pub use stores::{MemoryVectorStore, QueryMatch, VectorRecord, VectorStore};
pub use trace::{Span, SpanContent, SpanStatus, SubmissionOutcome, TokenUsage, Trace, TraceSubmitter};
pub use types::PipelineError;
