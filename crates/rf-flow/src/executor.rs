//! Node execution algorithm: validate,
//! retry with exponential backoff under a deadline-aware budget, then
//! validate the result.

use std::time::Duration;

use async_trait::async_trait;
use rf_core::envelope::{ErrorCode, FlowError, MessageEnvelope, Payload};
use rf_core::policy::NodePolicy;
use tokio::time::Instant;

/// `MessageEnvelope::meta` key a directed routing hint is stashed under
/// between `execute()` producing an output and the runtime's worker loop
/// routing it.
pub const ROUTE_TO_KEY: &str = "route_to";

#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl NodeFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// One value emitted by a node, with an optional directed routing hint.
/// `route_to: None` is the default: broadcast to every successor (and to
/// `ROOKERY` if the node is egress). `Some(names)` restricts delivery to
/// just those names; a name that is neither a declared successor nor
/// `ROOKERY` (when the node is egress) fails with `ROUTING_INVALID`.
#[derive(Debug, Clone)]
pub struct NodeOutput<T> {
    pub value: T,
    pub route_to: Option<Vec<String>>,
}

impl<T> NodeOutput<T> {
    pub fn broadcast(value: T) -> Self {
        Self { value, route_to: None }
    }

    pub fn to(value: T, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { value, route_to: Some(targets.into_iter().map(Into::into).collect()) }
    }
}

impl<T> From<T> for NodeOutput<T> {
    fn from(value: T) -> Self {
        Self::broadcast(value)
    }
}

/// A node's behavior: an async function from one payload to zero-or-more
/// outputs, plus optional schema validators.
#[async_trait]
pub trait Node<T: Send + 'static>: Send + Sync {
    async fn call(&self, input: T) -> Result<Vec<NodeOutput<T>>, NodeFailure>;

    fn validate_input(&self, _input: &T) -> Result<(), NodeFailure> {
        Ok(())
    }

    fn validate_output(&self, _output: &T) -> Result<(), NodeFailure> {
        Ok(())
    }
}

/// Execute `node` against `envelope`: validate-in, retry-with-backoff under
/// `min(policy.timeout_s, remaining deadline)`, validate-out, or produce a
/// classified `FlowError`.
pub async fn execute<T: Send + Clone + 'static>(
    node: &dyn Node<T>,
    node_name: &str,
    policy: &NodePolicy,
    envelope: MessageEnvelope<T>,
) -> Result<Vec<MessageEnvelope<T>>, FlowError> {
    let input = envelope.payload.plain().cloned().expect("plain payload expected at node entry");

    if policy.validate.validates_input() {
        if let Err(failure) = node.validate_input(&input) {
            return Err(FlowError::new(ErrorCode::ValidationInput, envelope.trace_id.clone(), failure.message).with_node(node_name));
        }
    }

    let mut last_failure: Option<NodeFailure> = None;

    for attempt in 0..=policy.max_retries {
        let budget = remaining_budget(policy.timeout_s, envelope.deadline);
        let outcome = match budget {
            Some(d) => tokio::time::timeout(d, node.call(input.clone())).await,
            None => Ok(node.call(input.clone()).await),
        };

        match outcome {
            Ok(Ok(outputs)) => {
                for out in &outputs {
                    if policy.validate.validates_output() {
                        if let Err(failure) = node.validate_output(&out.value) {
                            return Err(FlowError::new(ErrorCode::ValidationOutput, envelope.trace_id.clone(), failure.message)
                                .with_node(node_name));
                        }
                    }
                }
                return Ok(outputs
                    .into_iter()
                    .map(|o| {
                        let mut next = envelope.next_hop(Payload::Plain(o.value));
                        if let Some(targets) = o.route_to {
                            next.meta.insert(ROUTE_TO_KEY.to_string(), serde_json::json!(targets));
                        }
                        next
                    })
                    .collect());
            }
            Ok(Err(failure)) => {
                let retryable = failure.code.is_retryable();
                last_failure = Some(failure);
                if !retryable || attempt == policy.max_retries {
                    break;
                }
            }
            Err(_elapsed) => {
                let failure = NodeFailure::new(ErrorCode::Timeout, "node execution exceeded its budget");
                let retryable = failure.code.is_retryable();
                last_failure = Some(failure);
                if !retryable || attempt == policy.max_retries {
                    break;
                }
            }
        }

        let backoff = policy.backoff_for_attempt(attempt);
        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
    }

    let failure = last_failure.unwrap_or_else(|| NodeFailure::new(ErrorCode::PermanentTool, "node failed with no recorded cause"));
    Err(FlowError::new(failure.code, envelope.trace_id.clone(), failure.message).with_node(node_name))
}

fn remaining_budget(timeout_s: Option<f64>, deadline: Option<chrono::DateTime<chrono::Utc>>) -> Option<Duration> {
    let from_deadline = deadline.map(|d| {
        let now = chrono::Utc::now();
        let secs = (d - now).num_milliseconds().max(0) as f64 / 1000.0;
        Duration::from_secs_f64(secs)
    });
    match (timeout_s.map(Duration::from_secs_f64), from_deadline) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Monotonic clock for latency measurement, kept distinct from `chrono`'s
/// wall clock used for deadlines.
pub fn now_monotonic() -> Instant {
    Instant::now()
}
