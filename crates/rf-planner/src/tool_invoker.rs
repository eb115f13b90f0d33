//! The seam between the planner and the flow runtime: a `call` action
//! resolves via the catalog and dispatches through this trait.
//!
//! The planner dispatches actions by tool name and a JSON argument bag; a
//! [`FlowRuntime`](rf_flow::FlowRuntime) is generic over a concrete payload
//! type and has no such name-addressed entry point of its own. `ToolInvoker`
//! is the trait an application wires a flow runtime behind — keeping
//! `rf-planner` free of a payload type parameter.

use async_trait::async_trait;
use rf_core::envelope::FlowError;

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<serde_json::Value, FlowError>;
}
