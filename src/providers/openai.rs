//! OpenAI-compatible HTTP providers.
//!
//! Thin reqwest clients for the `/embeddings` and `/chat/completions`
//! endpoints. Requests are single attempts with a bearer credential; callers
//! wanting retries or deadlines impose them externally.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::trace::TokenUsage;
use crate::types::PipelineError;

use super::{ChatMessage, ChatProvider, ChatResponse, EmbeddingProvider};

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiEmbeddingProvider {
    http: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        http: Client,
        endpoint: Url,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({ "model": self.model, "input": texts });
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::Embedding(err.to_string()))?
            .error_for_status()
            .map_err(|err| PipelineError::Embedding(err.to_string()))?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Embedding(format!("malformed response: {err}")))?;

        if parsed.data.len() != texts.len() {
            return Err(PipelineError::Embedding(format!(
                "expected {} vectors, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut rows = parsed.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }
}

/// Chat client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiChatProvider {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl OpenAiChatProvider {
    pub fn new(http: Client, endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageRow>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct UsageRow {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        settings: &Value,
    ) -> Result<ChatResponse, PipelineError> {
        let mut body = json!({ "model": model, "messages": messages });
        // Deployment settings (temperature, max_tokens, ...) merge in at the
        // request's top level; explicit model/messages keys win.
        if let (Value::Object(target), Value::Object(settings)) = (&mut body, settings) {
            for (key, value) in settings {
                target.entry(key.clone()).or_insert(value.clone());
            }
        }

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::Generation(err.to_string()))?
            .error_for_status()
            .map_err(|err| PipelineError::Generation(err.to_string()))?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Generation(format!("malformed response: {err}")))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| PipelineError::Generation("response contained no choices".to_string()))?;

        let usage = parsed.usage.map(|row| TokenUsage {
            input: row.prompt_tokens,
            output: row.completion_tokens,
            total: row.total_tokens,
        });

        Ok(ChatResponse { message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn embeddings_are_returned_in_input_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).header("authorization", "Bearer k");
                then.status(200).json_body(json!({
                    "data": [
                        {"index": 1, "embedding": [2.0, 2.0]},
                        {"index": 0, "embedding": [1.0, 1.0]}
                    ]
                }));
            })
            .await;

        let provider = OpenAiEmbeddingProvider::new(
            Client::new(),
            Url::parse(&server.url("/embeddings")).unwrap(),
            "k",
            "text-embedding-3-small",
        );
        let vectors = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[tokio::test]
    async fn chat_reads_first_choice_and_usage() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "forty-two"}}
                    ],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
                }));
            })
            .await;

        let provider = OpenAiChatProvider::new(
            Client::new(),
            Url::parse(&server.url("/chat/completions")).unwrap(),
            "k",
        );
        let response = provider
            .complete(
                "gpt-4o-mini",
                &[ChatMessage::user("the answer?")],
                &json!({"temperature": 0.1}),
            )
            .await
            .unwrap();
        assert_eq!(response.message.content, "forty-two");
        let usage = response.usage.unwrap();
        assert_eq!(usage.total, 15);
    }

    #[tokio::test]
    async fn provider_failure_propagates_as_stage_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(429);
            })
            .await;

        let provider = OpenAiChatProvider::new(
            Client::new(),
            Url::parse(&server.url("/chat/completions")).unwrap(),
            "k",
        );
        let result = provider
            .complete("gpt-4o-mini", &[ChatMessage::user("hi")], &Value::Null)
            .await;
        assert!(matches!(result, Err(PipelineError::Generation(_))));
    }
}
