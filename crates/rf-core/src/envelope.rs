//! The typed message envelope that flows across every edge of a flow graph.
//!
//! Every message a node produces or consumes is wrapped in a [`MessageEnvelope`].
//! The envelope is the unit the flow runtime schedules, retries, and routes —
//! never the bare payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Headers carried on every envelope, independent of payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    pub tenant: String,
    pub topic: String,
    pub schema_version: u32,
}

/// Trace-scoped key/value metadata. Must never carry mutable infrastructure
/// handles (connections, locks) — only plain, cloneable data.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// The error taxonomy surfaced to callers and to the planner.
///
/// Codes, not types: every failure path — node, planner, or graph-assembly —
/// resolves to one of these before it crosses a crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationInput,
    ValidationOutput,
    Timeout,
    TransientTool,
    PermanentTool,
    DeadlineExceeded,
    BudgetExhausted,
    LlmParse,
    LlmContextLength,
    LlmUnavailable,
    Cancelled,
    FlowCyclic,
    RoutingInvalid,
    ContextPatchDivergent,
}

impl ErrorCode {
    /// Whether a node-executor failure with this code should be retried
    /// (subject to `max_retries` and remaining deadline).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Timeout | ErrorCode::TransientTool)
    }
}

/// A flow-error envelope payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowError {
    pub code: ErrorCode,
    pub message: String,
    pub node_name: Option<String>,
    pub trace_id: String,
    pub original_exception: Option<String>,
    pub metadata: Meta,
}

impl FlowError {
    pub fn new(code: ErrorCode, trace_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_name: None,
            trace_id: trace_id.into(),
            original_exception: None,
            metadata: Meta::new(),
        }
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The phase of a streaming chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Action,
    Answer,
    Revision,
    Observation,
}

/// A specialization of payload carrying an incremental text chunk.
///
/// Within one `stream_id`, `seq` values strictly increase and exactly one
/// chunk has `done = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingChunk {
    pub stream_id: String,
    pub seq: u64,
    pub text: String,
    pub done: bool,
    pub phase: StreamPhase,
}

/// The three shapes a message's payload may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Payload<T> {
    Plain(T),
    Chunk(StreamingChunk),
    Error(FlowError),
}

impl<T> Payload<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }

    pub fn plain(&self) -> Option<&T> {
        match self {
            Payload::Plain(v) => Some(v),
            _ => None,
        }
    }
}

/// The envelope every message carries across a Floe.
///
/// Invariants upheld by constructors/copiers in this module (never by callers
/// reaching into fields directly):
/// - `hops` strictly increases along any path from `OPEN_SEA` to `ROOKERY`.
/// - `deadline` is set once, at ingress, and never mutated afterward.
/// - `trace_id` is preserved verbatim across `next_hop` and sub-flow forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: Payload<T>,
    pub headers: Headers,
    pub trace_id: String,
    pub deadline: Option<DateTime<Utc>>,
    pub hops: u64,
    pub meta: Meta,
}

impl<T> MessageEnvelope<T> {
    /// Construct a fresh envelope at `OPEN_SEA` (hops = 0).
    pub fn ingress(
        payload: T,
        headers: Headers,
        trace_id: impl Into<String>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            payload: Payload::Plain(payload),
            headers,
            trace_id: trace_id.into(),
            deadline,
            hops: 0,
            meta: Meta::new(),
        }
    }

    /// Produce the envelope for the next hop: same trace/headers/deadline,
    /// strictly incremented hop counter, new payload.
    pub fn next_hop(&self, payload: Payload<T>) -> MessageEnvelope<T> {
        MessageEnvelope {
            payload,
            headers: self.headers.clone(),
            trace_id: self.trace_id.clone(),
            deadline: self.deadline,
            hops: self.hops + 1,
            meta: self.meta.clone(),
        }
    }

    /// Convert this envelope into a terminal flow-error envelope bound for
    /// `ROOKERY`, preserving trace identity per the error-handling policy.
    pub fn into_error(&self, code: ErrorCode, message: impl Into<String>) -> MessageEnvelope<T> {
        let err = FlowError::new(code, self.trace_id.clone(), message);
        self.next_hop(Payload::Error(err))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }
}
