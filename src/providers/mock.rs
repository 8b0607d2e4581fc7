//! Deterministic provider stand-ins for tests and demos.

use async_trait::async_trait;
use serde_json::Value;

use crate::trace::TokenUsage;
use crate::types::PipelineError;

use super::{ChatMessage, ChatProvider, ChatResponse, EmbeddingProvider, pricing};

/// Hash-derived embeddings with a fixed width.
///
/// Identical text always produces the identical vector, so tests exercising
/// ingestion and retrieval stay reproducible without a network.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    width: usize,
}

impl MockEmbeddingProvider {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts
            .iter()
            .map(|text| hash_to_vec(text, self.width))
            .collect())
    }
}

fn hash_to_vec(text: &str, width: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();
    (0..width)
        .map(|i| {
            let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64) << 24);
            (bits as f32) / u32::MAX as f32
        })
        .collect()
}

/// Canned chat responses with estimated token usage.
#[derive(Clone, Debug)]
pub struct MockChatProvider {
    reply: String,
    report_usage: bool,
}

impl MockChatProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            report_usage: true,
        }
    }

    /// Suppresses usage reporting, forcing callers onto their own estimates.
    #[must_use]
    pub fn without_usage(mut self) -> Self {
        self.report_usage = false;
        self
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _settings: &Value,
    ) -> Result<ChatResponse, PipelineError> {
        let usage = self.report_usage.then(|| {
            let prompt: usize = messages.iter().map(|m| m.content.len()).sum();
            TokenUsage::new(
                pricing::estimate_tokens_from_chars(prompt),
                pricing::estimate_tokens(&self.reply),
            )
        });
        Ok(ChatResponse {
            message: ChatMessage::assistant(self.reply.clone()),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic_and_sized() {
        let provider = MockEmbeddingProvider::new(16);
        let texts = vec![
            "hello world".to_string(),
            "goodbye world".to_string(),
            "hello world".to_string(),
        ];
        let first = provider.embed(&texts).await.unwrap();
        let second = provider.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
        for vector in &first {
            assert_eq!(vector.len(), 16);
        }
    }

    #[tokio::test]
    async fn mock_chat_reports_usage_unless_suppressed() {
        let messages = vec![ChatMessage::user("question")];
        let with_usage = MockChatProvider::new("answer")
            .complete("any", &messages, &Value::Null)
            .await
            .unwrap();
        assert!(with_usage.usage.is_some());
        assert_eq!(with_usage.message.content, "answer");

        let without = MockChatProvider::new("answer")
            .without_usage()
            .complete("any", &messages, &Value::Null)
            .await
            .unwrap();
        assert!(without.usage.is_none());
    }
}
