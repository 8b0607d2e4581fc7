//! Wire payload construction and best-effort trace submission.
//!
//! The telemetry endpoint expects one POST per trace:
//! `{ projectId, trace: {...}, spans: [...] }` with camelCase keys and
//! statuses in the endpoint's vocabulary (`success` / `failure`). Span
//! content input/output are serialized to text, model spans promote
//! cost/provider/model to the content's top level, and every span is
//! normalized to a minimum 1 ms duration so zero-duration operations never
//! produce degenerate intervals downstream.
//!
//! Submission is one attempt. A failed submission is reported back as a
//! [`SubmissionOutcome`] and logged; telemetry loss must never fail the
//! primary pipeline.

use std::collections::BTreeSet;
use std::env;

use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value, json};
use url::Url;

use crate::types::PipelineError;

use super::{Span, SpanContent, SpanStatus, Trace, now_ms};

/// Result of one submission attempt. Failures carry the reason so callers
/// and tests can assert on degraded-but-non-fatal outcomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Failed { reason: String },
}

impl SubmissionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted)
    }
}

/// Complete request body for the telemetry endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePayload {
    pub project_id: String,
    pub trace: TraceBody,
    pub spans: Vec<SpanBody>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub started_at: i64,
    pub ended_at: i64,
    pub name: String,
    pub status: String,
    pub reference_id: String,
    pub session_id: String,
    pub attributes: Map<String, Value>,
    pub tags: BTreeSet<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanBody {
    pub started_at: i64,
    pub ended_at: i64,
    pub name: String,
    pub status: String,
    pub content: Value,
    pub reference_id: Option<String>,
    pub parent_reference_id: Option<String>,
    pub prompt_id: Option<String>,
    pub deployment_id: Option<String>,
    pub session_id: Option<String>,
    pub attributes: Map<String, Value>,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_evaluation: Option<bool>,
}

fn status_label(status: SpanStatus) -> String {
    match status {
        SpanStatus::Success => "success".to_string(),
        SpanStatus::Error => "failure".to_string(),
    }
}

/// Builds the wire payload for `trace`.
///
/// Defensive against unfinalized input: a zero `ended_at` is stamped here
/// and the trace status is recomputed from the spans.
pub fn build_payload(project_id: &str, trace: &Trace) -> TracePayload {
    let trace_status = if trace.has_errors() {
        SpanStatus::Error
    } else {
        SpanStatus::Success
    };
    let ended_at = if trace.ended_at == 0 {
        now_ms()
    } else {
        trace.ended_at
    };

    TracePayload {
        project_id: project_id.to_string(),
        trace: TraceBody {
            started_at: trace.started_at,
            ended_at,
            name: trace.name.clone(),
            status: status_label(trace_status),
            reference_id: trace.reference_id.clone(),
            session_id: trace.session_id.clone(),
            attributes: trace.attributes.clone(),
            tags: trace.tags.clone(),
        },
        spans: trace.spans.iter().map(span_body).collect(),
    }
}

fn span_body(span: &Span) -> SpanBody {
    // Never transmit a zero or negative interval.
    let ended_at = span.ended_at.max(span.started_at + 1);

    SpanBody {
        started_at: span.started_at,
        ended_at,
        name: span.name.clone(),
        status: status_label(span.status),
        content: content_body(span, ended_at),
        reference_id: span.reference_id.clone(),
        parent_reference_id: span.parent_reference_id.clone(),
        prompt_id: span.prompt_id.clone(),
        deployment_id: span.deployment_id.clone(),
        session_id: span.session_id.clone(),
        attributes: span.attributes.clone(),
        tags: span.tags.clone(),
        run_evaluation: span.run_evaluation,
    }
}

/// Serializes span content for transport.
///
/// Model content promotes `cost`/`provider`/`model` to the top level of the
/// content object and folds token counts into the output structure as
/// `tokenUsage`; every other kind folds `cost`/`latency`/`tokens` into the
/// output structure instead.
fn content_body(span: &Span, ended_at: i64) -> Value {
    let latency = ended_at - span.started_at;

    match &span.content {
        SpanContent::Function { input, output } => json!({
            "type": "function",
            "input": value_to_text(input),
            "output": folded_output(output.clone(), span, latency),
        }),
        SpanContent::Model {
            provider,
            model,
            messages,
            response,
        } => {
            let mut output = match response {
                Some(message) => as_object(json!(message)),
                None => Map::new(),
            };
            if let Some(tokens) = &span.tokens {
                output.insert(
                    "tokenUsage".to_string(),
                    json!({
                        "promptTokens": tokens.input,
                        "completionTokens": tokens.output,
                        "totalTokens": tokens.total,
                    }),
                );
            }
            json!({
                "type": "model",
                "provider": provider,
                "model": model,
                "cost": span.cost,
                "input": value_to_text(&json!(messages)),
                "output": value_to_text(&Value::Object(output)),
            })
        }
        SpanContent::Embeddings {
            model,
            inputs,
            vectors,
            native_width,
            projected_width,
        } => {
            let output = json!({
                "model": model,
                "vectors": vectors,
                "nativeWidth": native_width,
                "projectedWidth": projected_width,
            });
            json!({
                "type": "embeddings",
                "input": value_to_text(&json!(inputs)),
                "output": folded_output(output, span, latency),
            })
        }
        SpanContent::Retrieval {
            query,
            requested,
            returned,
            documents,
        } => {
            let output = json!({
                "requested": requested,
                "returned": returned,
                "documents": documents,
            });
            json!({
                "type": "retrieval",
                "input": value_to_text(&Value::from(query.clone())),
                "output": folded_output(output, span, latency),
            })
        }
    }
}

/// Folds cost/latency/tokens into an output structure and serializes it.
fn folded_output(output: Value, span: &Span, latency: i64) -> String {
    let mut object = as_object(output);
    object.insert("cost".to_string(), json!(span.cost));
    object.insert("latency".to_string(), json!(latency));
    if let Some(tokens) = &span.tokens {
        object.insert("tokens".to_string(), json!(tokens));
    }
    value_to_text(&Value::Object(object))
}

/// Objects stay objects; any other value is wrapped so folded fields have a
/// place to land.
fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Lossless text encoding: strings pass through, everything else is
/// JSON-encoded.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Best-effort HTTP submitter for finished traces.
#[derive(Clone, Debug)]
pub struct TraceSubmitter {
    http: Client,
    endpoint: Url,
    api_key: String,
    project_id: String,
}

impl TraceSubmitter {
    pub fn new(
        http: Client,
        endpoint: Url,
        api_key: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
            project_id: project_id.into(),
        }
    }

    /// Builds a submitter from `RAGLINE_TELEMETRY_URL`, `RAGLINE_API_KEY`,
    /// and `RAGLINE_PROJECT_ID`.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let endpoint = env::var("RAGLINE_TELEMETRY_URL").map_err(|_| {
            PipelineError::Config("missing environment variable RAGLINE_TELEMETRY_URL".to_string())
        })?;
        let endpoint = Url::parse(&endpoint).map_err(|err| {
            PipelineError::Config(format!("invalid RAGLINE_TELEMETRY_URL: {err}"))
        })?;
        let api_key = env::var("RAGLINE_API_KEY").map_err(|_| {
            PipelineError::Config("missing environment variable RAGLINE_API_KEY".to_string())
        })?;
        let project_id = env::var("RAGLINE_PROJECT_ID").map_err(|_| {
            PipelineError::Config("missing environment variable RAGLINE_PROJECT_ID".to_string())
        })?;
        Ok(Self::new(Client::new(), endpoint, api_key, project_id))
    }

    /// Submits `trace` in a single attempt.
    ///
    /// Network or non-success responses are logged and reported in the
    /// returned outcome; they are never retried and never escalated.
    pub async fn submit(&self, trace: &Trace) -> SubmissionOutcome {
        let payload = build_payload(&self.project_id, trace);

        let result = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(
                    trace = %trace.reference_id,
                    spans = trace.spans.len(),
                    "trace submitted"
                );
                SubmissionOutcome::Accepted
            }
            Ok(response) => {
                let reason = format!("telemetry endpoint returned {}", response.status());
                tracing::warn!(trace = %trace.reference_id, %reason, "trace submission rejected");
                SubmissionOutcome::Failed { reason }
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(trace = %trace.reference_id, %reason, "trace submission failed");
                SubmissionOutcome::Failed { reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;
    use crate::trace::{MatchedDocument, TokenUsage};
    use httpmock::prelude::*;

    fn model_span() -> Span {
        Span::new(
            "generate",
            SpanContent::Model {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                messages: vec![ChatMessage::user("hello")],
                response: Some(ChatMessage::assistant("hi there")),
            },
        )
        .with_interval(1_000, 1_400)
        .with_cost(0.0125)
        .with_tokens(TokenUsage {
            input: 10,
            output: 20,
            total: 30,
        })
    }

    #[test]
    fn model_content_promotes_cost_and_folds_token_usage() {
        let mut trace = Trace::new("run");
        trace.add_span(model_span());
        let payload = build_payload("project-1", &trace);

        let content = &payload.spans[0].content;
        assert_eq!(content["type"], "model");
        assert_eq!(content["provider"], "openai");
        assert_eq!(content["model"], "gpt-4o-mini");
        assert!((content["cost"].as_f64().unwrap() - 0.0125).abs() < 1e-9);

        let output: Value =
            serde_json::from_str(content["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["tokenUsage"]["promptTokens"], 10);
        assert_eq!(output["tokenUsage"]["completionTokens"], 20);
        assert_eq!(output["tokenUsage"]["totalTokens"], 30);
        assert_eq!(output["content"], "hi there");
    }

    #[test]
    fn non_model_content_folds_cost_latency_tokens_into_output() {
        let mut trace = Trace::new("run");
        trace.add_span(
            Span::new(
                "lookup",
                SpanContent::Retrieval {
                    query: "what is rust".to_string(),
                    requested: 3,
                    returned: 2,
                    documents: vec![MatchedDocument {
                        id: "doc-chunk-0".to_string(),
                        score: 0.91,
                        content: "Rust is a language.".to_string(),
                    }],
                },
            )
            .with_interval(2_000, 2_030)
            .with_cost(0.0)
            .with_tokens(TokenUsage::new(4, 0)),
        );
        let payload = build_payload("project-1", &trace);

        let content = &payload.spans[0].content;
        assert_eq!(content["type"], "retrieval");
        // Query text passes through as plain text.
        assert_eq!(content["input"], "what is rust");
        assert!(content.get("cost").is_none());

        let output: Value =
            serde_json::from_str(content["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["requested"], 3);
        assert_eq!(output["returned"], 2);
        assert_eq!(output["latency"], 30);
        assert_eq!(output["cost"], 0.0);
        assert_eq!(output["tokens"]["total"], 4);
    }

    #[test]
    fn zero_duration_spans_get_a_minimum_interval() {
        let mut trace = Trace::new("run");
        trace.add_span(
            Span::new(
                "instant",
                SpanContent::Function {
                    input: Value::Null,
                    output: Value::Null,
                },
            )
            .with_interval(5_000, 5_000),
        );
        trace.add_span(
            Span::new(
                "backwards",
                SpanContent::Function {
                    input: Value::Null,
                    output: Value::Null,
                },
            )
            .with_interval(5_000, 4_000),
        );
        let payload = build_payload("project-1", &trace);
        assert_eq!(payload.spans[0].ended_at, 5_001);
        assert_eq!(payload.spans[1].ended_at, 5_001);
    }

    #[test]
    fn statuses_map_to_endpoint_vocabulary() {
        let mut trace = Trace::new("run");
        trace.add_span(model_span().with_status(SpanStatus::Error));
        trace.finalize();
        let payload = build_payload("project-1", &trace);
        assert_eq!(payload.trace.status, "failure");
        assert_eq!(payload.spans[0].status, "failure");
    }

    #[test]
    fn unfinalized_traces_are_stamped_in_the_payload() {
        let trace = Trace::new("run");
        let payload = build_payload("project-1", &trace);
        assert!(payload.trace.ended_at > 0);
        assert_eq!(payload.trace.status, "success");
    }

    #[tokio::test]
    async fn submit_posts_payload_with_bearer_credential() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .header("authorization", "Bearer telemetry-key")
                    .json_body_partial(r#"{"projectId": "project-1"}"#);
                then.status(200);
            })
            .await;

        let mut trace = Trace::new("run");
        trace.add_span(model_span());
        trace.finalize();

        let submitter = TraceSubmitter::new(
            Client::new(),
            Url::parse(&server.url("/traces")).unwrap(),
            "telemetry-key",
            "project-1",
        );
        let outcome = submitter.submit(&trace).await;
        assert!(outcome.is_accepted());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn failed_submission_reports_without_erroring() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500);
            })
            .await;

        let mut trace = Trace::new("run");
        trace.finalize();

        let submitter = TraceSubmitter::new(
            Client::new(),
            Url::parse(&server.url("/traces")).unwrap(),
            "telemetry-key",
            "project-1",
        );
        match submitter.submit(&trace).await {
            SubmissionOutcome::Failed { reason } => assert!(reason.contains("500")),
            SubmissionOutcome::Accepted => panic!("submission should have failed"),
        }
    }
}
