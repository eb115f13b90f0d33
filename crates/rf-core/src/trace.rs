use serde::Serialize;

/// Structured trace events emitted across the reactorflow crates, matching
/// the ambient-logging convention: high-value lifecycle events get a
/// typed variant here and are emitted as one structured `tracing` record;
/// routine decision points (retry, backoff) use plain `tracing::debug!`
/// calls at their call site instead.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    NodeStarted {
        node_name: String,
        trace_id: String,
        hops: u64,
    },
    NodeFinished {
        node_name: String,
        trace_id: String,
        attempt: u32,
        latency_ms: u64,
    },
    NodeError {
        node_name: String,
        trace_id: String,
        code: String,
        attempt: u32,
        retrying: bool,
    },
    MessageEmitted {
        node_name: String,
        trace_id: String,
        successors: usize,
    },
    TraceCancelled {
        trace_id: String,
    },
    DeadlineExceeded {
        trace_id: String,
        node_name: Option<String>,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    PlannerIteration {
        trace_id: String,
        iteration: u32,
        hops_used: u64,
    },
    PlannerBudgetExhausted {
        trace_id: String,
        iteration: u32,
    },
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    SessionSerialized {
        session_id: String,
        waited_ms: u64,
    },
    PatchApplied {
        task_id: String,
        session_id: String,
        divergent: bool,
        merge_strategy: String,
    },
    SteeringDelivered {
        task_id: String,
        event_type: String,
    },
    MemoryDegraded {
        tenant_id: String,
        user_id: String,
        session_id: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "reactorflow_event");
    }
}
