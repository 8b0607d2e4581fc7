//! Provider seams for embeddings and chat completion.
//!
//! Providers are external collaborators behind two narrow async traits; the
//! pipeline never depends on a concrete vendor. [`openai`] is a thin
//! OpenAI-compatible HTTP implementation and [`mock`] provides deterministic
//! stand-ins for tests and demos.

pub mod mock;
pub mod openai;
pub mod pricing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::TokenUsage;
use crate::types::PipelineError;

pub use mock::{MockChatProvider, MockEmbeddingProvider};
pub use openai::{OpenAiChatProvider, OpenAiEmbeddingProvider};
pub use pricing::{cost_for, estimate_tokens};

/// One role-tagged message in a chat exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A completed generation call: the assistant message plus token counts,
/// when the provider reported them.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

/// Uniform call contract for embedding providers.
///
/// `embed` returns one vector per input text, order-preserving. Native
/// vector width is whatever the model produces; callers reconcile it against
/// a fixed index width with [`crate::projection::project`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Uniform call contract for text-generation providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Single-attempt completion with the deployment's model and settings.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        settings: &Value,
    ) -> Result<ChatResponse, PipelineError>;
}
