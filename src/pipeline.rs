//! Orchestrator: one traced question-answering run.
//!
//! A run threads a single [`Trace`] through every stage. Spans are appended
//! when their operation completes, so a parent that covers child operations
//! lands after its children; causal order is carried by the explicit span
//! sequence counter. Success and failure both finalize and submit the trace;
//! only the primary result propagates as an error.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::{ConfigCache, inject_variables};
use crate::providers::{ChatMessage, ChatProvider, pricing};
use crate::retrieval::{RetrievalOutcome, Retriever};
use crate::trace::{
    MatchedDocument, Span, SpanContent, SpanStatus, SubmissionOutcome, TokenUsage, Trace,
    TraceSubmitter, now_ms,
};
use crate::types::PipelineError;

/// Template variable reserved for the retrieved snippets.
pub const CONTEXT_VARIABLE: &str = "context";

/// Knobs for one pipeline instance.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Matches requested from the store per run.
    pub top_k: usize,
    /// Name stamped on every trace this pipeline produces.
    pub trace_name: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            trace_name: "rag-pipeline".to_string(),
        }
    }
}

/// What a successful run hands back.
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    /// The assistant's reply text.
    pub text: String,
    /// Reference id of the submitted trace, for correlation.
    pub trace_reference_id: String,
    /// Whether the telemetry endpoint accepted the trace.
    pub submission: SubmissionOutcome,
}

/// Retrieval-augmented generation pipeline.
///
/// Holds its own configuration cache, so the deployment payload is fetched
/// once per pipeline instance no matter how many runs it serves.
pub struct Pipeline {
    config: Arc<ConfigCache>,
    retriever: Retriever,
    chat: Arc<dyn ChatProvider>,
    submitter: TraceSubmitter,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        config: Arc<ConfigCache>,
        retriever: Retriever,
        chat: Arc<dyn ChatProvider>,
        submitter: TraceSubmitter,
        options: PipelineOptions,
    ) -> Self {
        Self {
            config,
            retriever,
            chat,
            submitter,
            options,
        }
    }

    /// Runs one question through configuration, retrieval, and generation.
    ///
    /// `variables` fill the deployment's template placeholders; the reserved
    /// [`CONTEXT_VARIABLE`] is always overwritten with the joined retrieved
    /// snippets. The trace is finalized and submitted on every path, and a
    /// rejected submission degrades the outcome rather than failing the run.
    pub async fn run(
        &self,
        variables: &HashMap<String, Value>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut trace = Trace::new(&self.options.trace_name);

        // Configuration. Without a template there is nothing to run.
        let config_started = now_ms();
        let deployment = match self.config.deployment().await {
            Ok(deployment) => deployment.clone(),
            Err(err) => {
                trace.add_span(
                    Span::new(
                        "fetch-config",
                        SpanContent::Function {
                            input: Value::Null,
                            output: json!({ "error": err.to_string() }),
                        },
                    )
                    .with_interval(config_started, now_ms())
                    .with_status(SpanStatus::Error),
                );
                return self.abort(trace, err).await;
            }
        };
        trace.add_span(
            Span::new(
                "fetch-config",
                SpanContent::Function {
                    input: json!({ "promptId": deployment.prompt_id }),
                    output: json!({
                        "deploymentId": deployment.id,
                        "provider": deployment.prompt.config.provider_name,
                        "model": deployment.prompt.config.model,
                    }),
                },
            )
            .with_interval(config_started, now_ms())
            .with_prompt(&deployment.prompt_id, &deployment.id),
        );

        // The retrieval query is the combined template text with caller
        // variables already injected; the context placeholder is still
        // unresolved at this point and stays verbatim.
        let system_template = self.config.system_template().await?;
        let user_template = self.config.template("user").await?;
        let query = inject_variables(
            format!("{system_template}\n\n{user_template}").trim(),
            variables,
        );

        // Retrieval, recorded as two children under one covering parent.
        let assemble_started = now_ms();
        let retrieved = match self.retriever.retrieve_top_k(&query, self.options.top_k).await {
            Ok(retrieved) => retrieved,
            Err(err) => {
                trace.add_span(
                    Span::new(
                        "assemble-context",
                        SpanContent::Function {
                            input: json!({ "query": query, "topK": self.options.top_k }),
                            output: json!({ "error": err.to_string() }),
                        },
                    )
                    .with_interval(assemble_started, now_ms())
                    .with_status(SpanStatus::Error)
                    .with_prompt(&deployment.prompt_id, &deployment.id),
                );
                return self.abort(trace, err).await;
            }
        };
        let assemble_ended = now_ms();
        self.record_retrieval(
            &mut trace,
            &deployment.prompt_id,
            &deployment.id,
            &query,
            &retrieved,
            assemble_started,
            assemble_ended,
        );

        // Prompt assembly: retrieved snippets become the context variable.
        let context = retrieved
            .matches
            .iter()
            .map(|m| m.content.as_str())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut values = variables.clone();
        values.insert(CONTEXT_VARIABLE.to_string(), Value::from(context));

        let system = inject_variables(system_template, &values);
        let user = inject_variables(&user_template, &values);
        let mut messages = Vec::new();
        if !system.trim().is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(user));

        // Generation.
        let model_config = &deployment.prompt.config;
        let model_started = now_ms();
        let response = match self
            .chat
            .complete(&model_config.model, &messages, &model_config.settings)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                trace.add_span(
                    Span::new(
                        "generate",
                        SpanContent::Model {
                            provider: model_config.provider_name.clone(),
                            model: model_config.model.clone(),
                            messages: messages.clone(),
                            response: None,
                        },
                    )
                    .with_interval(model_started, now_ms())
                    .with_status(SpanStatus::Error)
                    .with_prompt(&deployment.prompt_id, &deployment.id),
                );
                return self.abort(trace, err).await;
            }
        };
        let model_ended = now_ms();

        let usage = response
            .usage
            .unwrap_or_else(|| estimate_usage(&messages, &response.message.content));
        let cost = pricing::cost_for(&model_config.model, &usage);
        trace.add_span(
            Span::new(
                "generate",
                SpanContent::Model {
                    provider: model_config.provider_name.clone(),
                    model: model_config.model.clone(),
                    messages,
                    response: Some(response.message.clone()),
                },
            )
            .with_interval(model_started, model_ended)
            .with_cost(cost)
            .with_tokens(usage)
            .with_prompt(&deployment.prompt_id, &deployment.id),
        );

        trace.finalize();
        let submission = self.submitter.submit(&trace).await;
        tracing::info!(
            trace = %trace.reference_id,
            spans = trace.spans.len(),
            cost,
            accepted = submission.is_accepted(),
            "pipeline run complete"
        );

        Ok(PipelineOutcome {
            text: response.message.content,
            trace_reference_id: trace.reference_id,
            submission,
        })
    }

    /// Appends the embeddings and store-query children first, then their
    /// covering parent, so append order matches completion order.
    #[allow(clippy::too_many_arguments)]
    fn record_retrieval(
        &self,
        trace: &mut Trace,
        prompt_id: &str,
        deployment_id: &str,
        query: &str,
        retrieved: &RetrievalOutcome,
        started_at: i64,
        ended_at: i64,
    ) {
        let parent_id = Uuid::new_v4().to_string();

        trace.add_span(
            Span::new(
                "embed-query",
                SpanContent::Embeddings {
                    model: retrieved.embedding.model.clone(),
                    inputs: vec![query.to_string()],
                    vectors: vec![retrieved.embedding.vector.clone()],
                    native_width: retrieved.embedding.native_width,
                    projected_width: retrieved.embedding.projected_width,
                },
            )
            .with_interval(retrieved.embedding.started_at, retrieved.embedding.ended_at)
            .with_parent(parent_id.clone())
            .with_prompt(prompt_id, deployment_id),
        );

        let documents: Vec<MatchedDocument> = retrieved
            .matches
            .iter()
            .map(|m| MatchedDocument {
                id: m.id.clone(),
                score: m.score,
                content: m.content.clone(),
            })
            .collect();
        trace.add_span(
            Span::new(
                "query-store",
                SpanContent::Retrieval {
                    query: query.to_string(),
                    requested: retrieved.store_query.requested,
                    returned: retrieved.store_query.returned,
                    documents,
                },
            )
            .with_interval(retrieved.store_query.started_at, retrieved.store_query.ended_at)
            .with_parent(parent_id.clone())
            .with_prompt(prompt_id, deployment_id),
        );

        trace.add_span(
            Span::new(
                "assemble-context",
                SpanContent::Function {
                    input: json!({ "query": query, "topK": self.options.top_k }),
                    output: json!({
                        "returned": retrieved.store_query.returned,
                        "resolved": retrieved
                            .matches
                            .iter()
                            .filter(|m| !m.content.is_empty())
                            .count(),
                    }),
                },
            )
            .with_interval(started_at, ended_at)
            .with_reference_id(parent_id)
            .with_prompt(prompt_id, deployment_id),
        );
    }

    /// Failure path: finalize, submit what was recorded, propagate the error.
    async fn abort(
        &self,
        mut trace: Trace,
        err: PipelineError,
    ) -> Result<PipelineOutcome, PipelineError> {
        trace.finalize();
        let submission = self.submitter.submit(&trace).await;
        tracing::warn!(
            trace = %trace.reference_id,
            accepted = submission.is_accepted(),
            error = %err,
            "pipeline run failed"
        );
        Err(err)
    }
}

/// Usage fallback when the provider reports none, at 4 characters per token.
fn estimate_usage(messages: &[ChatMessage], reply: &str) -> TokenUsage {
    let prompt_text: String = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("");
    TokenUsage::new(
        pricing::estimate_tokens(&prompt_text),
        pricing::estimate_tokens(reply),
    )
}
