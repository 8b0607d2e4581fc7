//! Hierarchical execution traces.
//!
//! A [`Trace`] is the append-only record of one pipeline execution; every
//! instrumented operation contributes one [`Span`] with timing, status, a
//! typed [`SpanContent`] payload, and cost/token rollups. Spans form a
//! shallow tree through `parent_reference_id` and carry an explicit
//! `sequence` counter assigned on append, so causal order is a first-class
//! field rather than a calling convention. Serialization to the telemetry
//! wire format lives in [`submit`].

pub mod submit;

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::providers::ChatMessage;

pub use submit::{SubmissionOutcome, TracePayload, TraceSubmitter, build_payload};

/// Millisecond wall-clock timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Success,
    Error,
}

/// Input/output/total token counts for one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// One document matched by a retrieval operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchedDocument {
    pub id: String,
    pub score: f32,
    pub content: String,
}

/// Typed per-operation payload, one variant per operation kind.
///
/// Input/output fields are opaque structured data to the trace model itself;
/// the wire transform serializes them losslessly to text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SpanContent {
    /// Generic input/output for non-model operations.
    Function { input: Value, output: Value },
    /// A generation-provider call.
    Model {
        provider: String,
        model: String,
        messages: Vec<ChatMessage>,
        response: Option<ChatMessage>,
    },
    /// An embedding-provider call, with dimensionality metadata.
    Embeddings {
        model: String,
        inputs: Vec<String>,
        vectors: Vec<Vec<f32>>,
        native_width: usize,
        projected_width: usize,
    },
    /// A vector-store query resolved back to source snippets.
    Retrieval {
        query: String,
        requested: usize,
        returned: usize,
        documents: Vec<MatchedDocument>,
    },
}

impl SpanContent {
    /// Wire tag for this content kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SpanContent::Function { .. } => "function",
            SpanContent::Model { .. } => "model",
            SpanContent::Embeddings { .. } => "embeddings",
            SpanContent::Retrieval { .. } => "retrieval",
        }
    }
}

/// One operation's record inside a [`Trace`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub status: SpanStatus,
    pub started_at: i64,
    pub ended_at: i64,
    pub content: SpanContent,
    /// This span's own identity, for children to link to.
    pub reference_id: Option<String>,
    /// Links to an ancestor span within the same trace.
    pub parent_reference_id: Option<String>,
    pub prompt_id: Option<String>,
    pub deployment_id: Option<String>,
    /// Inherited from the trace on append unless overridden per span.
    pub session_id: Option<String>,
    /// USD, may be zero.
    pub cost: f64,
    pub tokens: Option<TokenUsage>,
    pub attributes: Map<String, Value>,
    pub tags: BTreeSet<String>,
    pub run_evaluation: Option<bool>,
    /// Append-order position within the owning trace, assigned by
    /// [`Trace::add_span`]. Downstream consumers reconstruct causal order
    /// from this counter.
    pub sequence: u64,
}

impl Span {
    pub fn new(name: impl Into<String>, content: SpanContent) -> Self {
        let now = now_ms();
        Self {
            name: name.into(),
            status: SpanStatus::Success,
            started_at: now,
            ended_at: now,
            content,
            reference_id: None,
            parent_reference_id: None,
            prompt_id: None,
            deployment_id: None,
            session_id: None,
            cost: 0.0,
            tokens: None,
            attributes: Map::new(),
            tags: BTreeSet::new(),
            run_evaluation: None,
            sequence: 0,
        }
    }

    /// Derived duration in milliseconds.
    pub fn latency(&self) -> i64 {
        self.ended_at - self.started_at
    }

    #[must_use]
    pub fn with_interval(mut self, started_at: i64, ended_at: i64) -> Self {
        self.started_at = started_at;
        self.ended_at = ended_at;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_reference_id: impl Into<String>) -> Self {
        self.parent_reference_id = Some(parent_reference_id.into());
        self
    }

    #[must_use]
    pub fn with_prompt(
        mut self,
        prompt_id: impl Into<String>,
        deployment_id: impl Into<String>,
    ) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self.deployment_id = Some(deployment_id.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_run_evaluation(mut self, run_evaluation: bool) -> Self {
        self.run_evaluation = Some(run_evaluation);
        self
    }
}

/// One execution's root record.
///
/// Created at pipeline start with `ended_at = 0`, mutated only by appending
/// spans, finalized exactly once at pipeline end (success or failure).
/// Span insertion order is completion order, not necessarily start order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    pub status: SpanStatus,
    pub started_at: i64,
    /// Zero until [`finalize`](Self::finalize) runs.
    pub ended_at: i64,
    pub reference_id: String,
    pub session_id: String,
    pub spans: Vec<Span>,
    pub attributes: Map<String, Value>,
    pub tags: BTreeSet<String>,
    next_sequence: u64,
}

impl Trace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SpanStatus::Success,
            started_at: now_ms(),
            ended_at: 0,
            reference_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
            spans: Vec::new(),
            attributes: Map::new(),
            tags: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Appends a completed span.
    ///
    /// Assigns the next sequence number, merges trace-level attributes and
    /// tags beneath span-specific overrides, infers `content.type` (and
    /// `provider`/`model` for model content) into the attributes, always
    /// includes the span's own name in its tags, and inherits the trace
    /// session id when the span carries none.
    pub fn add_span(&mut self, mut span: Span) -> &mut Self {
        span.sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut attributes = self.attributes.clone();
        attributes.insert("content.type".to_string(), Value::from(span.content.kind()));
        if let SpanContent::Model {
            provider, model, ..
        } = &span.content
        {
            attributes.insert("provider".to_string(), Value::from(provider.clone()));
            attributes.insert("model".to_string(), Value::from(model.clone()));
        }
        for (key, value) in std::mem::take(&mut span.attributes) {
            attributes.insert(key, value);
        }
        span.attributes = attributes;

        let mut tags = self.tags.clone();
        tags.extend(std::mem::take(&mut span.tags));
        tags.insert(span.name.clone());
        span.tags = tags;

        if span.session_id.is_none() {
            span.session_id = Some(self.session_id.clone());
        }

        self.spans.push(span);
        self
    }

    /// True when any appended span errored.
    pub fn has_errors(&self) -> bool {
        self.spans
            .iter()
            .any(|span| span.status == SpanStatus::Error)
    }

    /// Sets the end timestamp (first call only) and recomputes the trace
    /// status from its spans.
    pub fn finalize(&mut self) -> &mut Self {
        if self.ended_at == 0 {
            self.ended_at = now_ms();
        }
        self.status = if self.has_errors() {
            SpanStatus::Error
        } else {
            SpanStatus::Success
        };
        self
    }
}
