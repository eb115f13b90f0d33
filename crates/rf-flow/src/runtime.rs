//! Flow runtime: one cooperative worker per node, per-trace pending
//! capacity, deadline enforcement, cancellation, and sub-flow calls.

use std::collections::HashMap;
use std::sync::Arc;

use rf_core::envelope::{ErrorCode, FlowError, Headers, MessageEnvelope, Payload};
use rf_core::trace::TraceEvent;
use tokio::sync::Mutex as AsyncMutex;

use crate::cancel::{CancelMap, CancelToken};
use crate::executor::{execute, Node, ROUTE_TO_KEY};
use crate::floe::{floe, Capacity, FloeReceiver, FloeSender};
use crate::graph::{FlowGraph, NodeId, ROOKERY};
use crate::middleware::{MiddlewareChain, RuntimeEvent};

/// Fire `event` at `middleware` off the hot path: the worker loop does not
/// wait for observers to run, so a slow or blocking `Middleware` impl never
/// stalls message delivery.
fn spawn_notify(middleware: &Arc<MiddlewareChain>, event: RuntimeEvent) {
    let middleware = middleware.clone();
    tokio::spawn(async move {
        middleware.notify(event).await;
    });
}

/// Per-trace in-flight message budget. Before a
/// node places a message on any outbound Floe it waits until the trace's
/// count is below `max_pending_per_trace`.
struct PendingCounter {
    counts: AsyncMutex<HashMap<String, i64>>,
    max_pending_per_trace: i64,
}

impl PendingCounter {
    fn new(max_pending_per_trace: usize) -> Self {
        Self { counts: AsyncMutex::new(HashMap::new()), max_pending_per_trace: max_pending_per_trace as i64 }
    }

    async fn acquire(&self, trace_id: &str, token: &CancelToken) {
        loop {
            {
                let mut counts = self.counts.lock().await;
                let entry = counts.entry(trace_id.to_owned()).or_insert(0);
                if *entry < self.max_pending_per_trace {
                    *entry += 1;
                    return;
                }
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
            }
        }
    }

    async fn release(&self, trace_id: &str) {
        let mut counts = self.counts.lock().await;
        if let Some(count) = counts.get_mut(trace_id) {
            *count -= 1;
        }
    }
}

/// A running instance of a [`FlowGraph`]: owns the Floes, worker tasks, and
/// cancellation/deadline bookkeeping for every trace submitted to it.
pub struct FlowRuntime<T> {
    graph: Arc<FlowGraph>,
    ingress_tx: HashMap<NodeId, FloeSender<MessageEnvelope<T>>>,
    cancel_map: Arc<CancelMap>,
    rookery_rx: AsyncMutex<FloeReceiver<MessageEnvelope<T>>>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl<T> Drop for FlowRuntime<T> {
    fn drop(&mut self) {
        for handle in &self.worker_handles {
            handle.abort();
        }
    }
}

pub struct FlowRuntimeBuilder<T> {
    graph: Arc<FlowGraph>,
    nodes: HashMap<NodeId, Arc<dyn Node<T>>>,
    floe_capacity: usize,
    max_pending_per_trace: usize,
    middleware: MiddlewareChain,
}

impl<T: Send + Sync + Clone + 'static> FlowRuntimeBuilder<T> {
    pub fn new(graph: Arc<FlowGraph>) -> Self {
        Self { graph, nodes: HashMap::new(), floe_capacity: 32, max_pending_per_trace: 64, middleware: MiddlewareChain::new() }
    }

    pub fn with_node(mut self, name: &str, node: Arc<dyn Node<T>>) -> Self {
        let id = self.graph.node_id(name).expect("node must be declared in the graph");
        self.nodes.insert(id, node);
        self
    }

    pub fn floe_capacity(mut self, capacity: usize) -> Self {
        self.floe_capacity = capacity;
        self
    }

    pub fn max_pending_per_trace(mut self, max: usize) -> Self {
        self.max_pending_per_trace = max;
        self
    }

    pub fn with_middleware(mut self, observer: Arc<dyn crate::middleware::Middleware>) -> Self {
        self.middleware.push(observer);
        self
    }

    /// Instantiate one Floe per declared node, one ingress sender per
    /// `OPEN_SEA`-targeted node, a shared Floe for `ROOKERY`, and spawn one
    /// worker per node.
    pub fn start(self) -> FlowRuntime<T> {
        let graph = self.graph;
        let mut inbound: HashMap<NodeId, FloeReceiver<MessageEnvelope<T>>> = HashMap::new();
        let mut senders: HashMap<NodeId, FloeSender<MessageEnvelope<T>>> = HashMap::new();

        for id in graph.node_ids() {
            let (tx, rx) = floe(Capacity::Bounded(self.floe_capacity));
            senders.insert(id, tx);
            inbound.insert(id, rx);
        }

        let ingress_tx: HashMap<NodeId, FloeSender<MessageEnvelope<T>>> =
            graph.node_ids().filter(|id| graph.is_ingress(*id)).map(|id| (id, senders[&id].clone())).collect();

        let (rookery_tx, rookery_rx) = floe(Capacity::Bounded(self.floe_capacity));

        let cancel_map = Arc::new(CancelMap::new());
        let pending = Arc::new(PendingCounter::new(self.max_pending_per_trace));
        let middleware = Arc::new(self.middleware);
        let nodes = self.nodes;
        let mut worker_handles = Vec::new();

        for id in graph.node_ids() {
            let node = match nodes.get(&id) {
                Some(n) => n.clone(),
                None => continue,
            };
            let mut rx = inbound.remove(&id).expect("receiver exists for every node");
            let successors: Vec<NodeId> = graph.successors(id).to_vec();
            let successor_senders: Vec<FloeSender<MessageEnvelope<T>>> =
                successors.iter().map(|s| senders[s].clone()).collect();
            let successor_names: Vec<String> = successors.iter().map(|s| graph.node(*s).name.clone()).collect();
            let is_egress = graph.is_egress(id);
            let node_name = graph.node(id).name.clone();
            let policy = graph.node(id).policy;
            let rookery_tx = rookery_tx.clone();
            let cancel_map = cancel_map.clone();
            let pending = pending.clone();
            let middleware = middleware.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let poll_token = CancelToken::new();
                    let envelope = match rx.get(&poll_token).await {
                        Ok(e) => e,
                        Err(_) => break,
                    };

                    let trace_token = cancel_map.register(&envelope.trace_id);
                    if trace_token.is_cancelled() {
                        let err = envelope.into_error(ErrorCode::Cancelled, "trace cancelled before node entry");
                        let _ = rookery_tx.put(err, &trace_token).await;
                        TraceEvent::TraceCancelled { trace_id: envelope.trace_id.clone() }.emit();
                        continue;
                    }

                    if envelope.is_expired(chrono::Utc::now()) {
                        let err = envelope.into_error(ErrorCode::DeadlineExceeded, "deadline exceeded before node entry");
                        let _ = rookery_tx.put(err, &trace_token).await;
                        TraceEvent::DeadlineExceeded { trace_id: envelope.trace_id.clone(), node_name: Some(node_name.clone()) }.emit();
                        continue;
                    }

                    TraceEvent::NodeStarted { node_name: node_name.clone(), trace_id: envelope.trace_id.clone(), hops: envelope.hops }.emit();
                    spawn_notify(&middleware, RuntimeEvent::NodeStarted { node_name: node_name.clone(), trace_id: envelope.trace_id.clone() });

                    let start = std::time::Instant::now();
                    let trace_id = envelope.trace_id.clone();
                    let in_headers = envelope.headers.clone();
                    let in_deadline = envelope.deadline;
                    let in_hops = envelope.hops;
                    match execute(node.as_ref(), &node_name, &policy, envelope).await {
                        Ok(outputs) => {
                            let latency_ms = start.elapsed().as_millis() as u64;
                            TraceEvent::NodeFinished { node_name: node_name.clone(), trace_id: trace_id.clone(), attempt: 0, latency_ms }.emit();
                            spawn_notify(&middleware, RuntimeEvent::NodeFinished { node_name: node_name.clone(), trace_id: trace_id.clone(), latency_ms });

                            for mut out in outputs {
                                let route_to = out
                                    .meta
                                    .remove(ROUTE_TO_KEY)
                                    .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok());

                                pending.acquire(&trace_id, &trace_token).await;
                                match route_to {
                                    None => {
                                        if is_egress {
                                            let _ = rookery_tx.put(out.clone(), &trace_token).await;
                                        }
                                        for sender in &successor_senders {
                                            let _ = sender.put(out.clone(), &trace_token).await;
                                        }
                                    }
                                    Some(targets) => {
                                        let invalid = targets.iter().find(|t| {
                                            let is_rookery_target = t.as_str() == ROOKERY && is_egress;
                                            let is_successor = successor_names.iter().any(|n| *n == **t);
                                            !is_rookery_target && !is_successor
                                        });
                                        if let Some(bad_target) = invalid {
                                            let err = FlowError::new(
                                                ErrorCode::RoutingInvalid,
                                                trace_id.clone(),
                                                format!("unknown routing target '{bad_target}' for node '{node_name}'"),
                                            );
                                            let err_envelope = out.next_hop(Payload::Error(err));
                                            let _ = rookery_tx.put(err_envelope, &trace_token).await;
                                        } else {
                                            for target in &targets {
                                                if target.as_str() == ROOKERY {
                                                    let _ = rookery_tx.put(out.clone(), &trace_token).await;
                                                } else if let Some(idx) = successor_names.iter().position(|n| n == target) {
                                                    let _ = successor_senders[idx].put(out.clone(), &trace_token).await;
                                                }
                                            }
                                        }
                                    }
                                }
                                pending.release(&trace_id).await;
                            }
                            spawn_notify(
                                &middleware,
                                RuntimeEvent::MessageEmitted {
                                    node_name: node_name.clone(),
                                    trace_id: trace_id.clone(),
                                    successors: successor_senders.len(),
                                },
                            );
                        }
                        Err(flow_error) => {
                            TraceEvent::NodeError {
                                node_name: node_name.clone(),
                                trace_id: trace_id.clone(),
                                code: format!("{:?}", flow_error.code),
                                attempt: 0,
                                retrying: false,
                            }
                            .emit();
                            spawn_notify(
                                &middleware,
                                RuntimeEvent::NodeError { node_name: node_name.clone(), trace_id: trace_id.clone(), code: format!("{:?}", flow_error.code) },
                            );
                            let err_envelope = MessageEnvelope {
                                payload: Payload::Error(flow_error),
                                headers: in_headers.clone(),
                                trace_id: trace_id.clone(),
                                deadline: in_deadline,
                                hops: in_hops + 1,
                                meta: Default::default(),
                            };
                            let _ = rookery_tx.put(err_envelope, &trace_token).await;
                        }
                    }
                }
            });
            worker_handles.push(handle);
        }

        FlowRuntime { graph, ingress_tx, cancel_map, rookery_rx: AsyncMutex::new(rookery_rx), worker_handles }
    }
}

impl<T: Send + Sync + Clone + 'static> FlowRuntime<T> {
    /// Submit a message at `OPEN_SEA` targeting `entry_node`.
    pub async fn submit(
        &self,
        entry_node: &str,
        payload: T,
        headers: Headers,
        trace_id: impl Into<String>,
        deadline: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), crate::floe::FloeError> {
        let trace_id = trace_id.into();
        let id = self.graph.node_id(entry_node).expect("entry node must exist in the graph");
        let tx = self.ingress_tx.get(&id).expect("entry node must be an ingress");
        let token = self.cancel_map.register(&trace_id);
        let envelope = MessageEnvelope::ingress(payload, headers, trace_id, deadline);
        tx.put(envelope, &token).await
    }

    /// Await exactly one terminal payload from `ROOKERY`.
    pub async fn recv_terminal(&self) -> Option<MessageEnvelope<T>> {
        let mut rx = self.rookery_rx.lock().await;
        let token = CancelToken::new();
        rx.get(&token).await.ok()
    }

    pub fn cancel(&self, trace_id: &str) {
        self.cancel_map.cancel(trace_id);
        TraceEvent::TraceCancelled { trace_id: trace_id.to_owned() }.emit();
    }

    pub fn cancel_token(&self, trace_id: &str) -> CancelToken {
        self.cancel_map.register(trace_id)
    }

    /// Register a sub-flow call's trace as a child of `parent_trace_id` so
    /// cancelling the parent cascades to it.
    pub fn register_child_trace(&self, parent_trace_id: &str, child_trace_id: &str) -> CancelToken {
        self.cancel_map.register_child(parent_trace_id, child_trace_id)
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }
}

/// Call a sub-flow as a nested playbook: the parent's trace_id, headers, and
/// deadline are forwarded unchanged. `parent_token` is the parent trace's own
/// `CancelToken` (from the parent `FlowRuntime::cancel_token`). The sub-flow
/// owns an independent `CancelMap`, so a parent cancellation can only reach
/// it by explicitly polling `parent_token` and cancelling the same trace_id
/// in the sub-flow's own map.
pub async fn call_playbook<T: Send + Sync + Clone + 'static>(
    sub_flow: &FlowRuntime<T>,
    entry_node: &str,
    parent: &MessageEnvelope<T>,
    parent_token: &CancelToken,
    payload: T,
) -> Result<MessageEnvelope<T>, crate::floe::FloeError> {
    sub_flow
        .submit(entry_node, payload, parent.headers.clone(), parent.trace_id.clone(), parent.deadline)
        .await?;

    tokio::select! {
        biased;
        _ = parent_token.cancelled() => {
            sub_flow.cancel(&parent.trace_id);
            Ok(parent.into_error(ErrorCode::Cancelled, "parent trace cancelled during sub-flow call"))
        }
        result = sub_flow.recv_terminal() => result.ok_or(crate::floe::FloeError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{NodeFailure, NodeOutput};
    use crate::graph::{FlowGraphBuilder, OPEN_SEA, ROOKERY};
    use async_trait::async_trait;
    use rf_core::policy::NodePolicy;

    struct Increment;
    #[async_trait]
    impl Node<i32> for Increment {
        async fn call(&self, input: i32) -> Result<Vec<NodeOutput<i32>>, NodeFailure> {
            Ok(vec![(input + 1).into()])
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Node<i32> for AlwaysFails {
        async fn call(&self, _input: i32) -> Result<Vec<NodeOutput<i32>>, NodeFailure> {
            Err(NodeFailure::new(ErrorCode::PermanentTool, "boom"))
        }
    }

    fn headers() -> Headers {
        Headers { tenant: "t".into(), topic: "x".into(), schema_version: 1 }
    }

    #[tokio::test]
    async fn message_flows_from_ingress_to_rookery() {
        let graph = Arc::new(
            FlowGraphBuilder::new()
                .add_node("a", NodePolicy::default())
                .add_node("b", NodePolicy::default())
                .add_edge(OPEN_SEA, "a")
                .add_edge("a", "b")
                .add_edge("b", ROOKERY)
                .build()
                .unwrap(),
        );
        let runtime = FlowRuntimeBuilder::<i32>::new(graph)
            .with_node("a", Arc::new(Increment))
            .with_node("b", Arc::new(Increment))
            .start();

        runtime.submit("a", 1, headers(), "trace-1", None).await.unwrap();
        let out = runtime.recv_terminal().await.unwrap();
        assert_eq!(out.payload.plain().copied(), Some(3));
        assert_eq!(out.hops, 2);
    }

    #[tokio::test]
    async fn directed_routing_hint_delivers_only_to_named_successor() {
        struct RouteToC;
        #[async_trait]
        impl Node<i32> for RouteToC {
            async fn call(&self, input: i32) -> Result<Vec<NodeOutput<i32>>, NodeFailure> {
                Ok(vec![NodeOutput::to(input, ["c"])])
            }
        }

        let graph = Arc::new(
            FlowGraphBuilder::new()
                .add_node("a", NodePolicy::default())
                .add_node("b", NodePolicy::default())
                .add_node("c", NodePolicy::default())
                .add_edge(OPEN_SEA, "a")
                .add_edge("a", "b")
                .add_edge("a", "c")
                .add_edge("b", ROOKERY)
                .add_edge("c", ROOKERY)
                .build()
                .unwrap(),
        );
        let runtime = FlowRuntimeBuilder::<i32>::new(graph)
            .with_node("a", Arc::new(RouteToC))
            .with_node("b", Arc::new(Increment))
            .with_node("c", Arc::new(Increment))
            .start();

        runtime.submit("a", 1, headers(), "trace-route", None).await.unwrap();
        let out = tokio::time::timeout(std::time::Duration::from_millis(200), runtime.recv_terminal()).await.unwrap().unwrap();
        assert_eq!(out.payload.plain().copied(), Some(2));

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), runtime.recv_terminal()).await;
        assert!(second.is_err(), "message must not also reach 'b' when routed only to 'c'");
    }

    #[tokio::test]
    async fn unknown_routing_target_fails_with_routing_invalid() {
        struct RouteToNowhere;
        #[async_trait]
        impl Node<i32> for RouteToNowhere {
            async fn call(&self, input: i32) -> Result<Vec<NodeOutput<i32>>, NodeFailure> {
                Ok(vec![NodeOutput::to(input, ["does-not-exist"])])
            }
        }

        let graph = Arc::new(
            FlowGraphBuilder::new()
                .add_node("a", NodePolicy::default())
                .add_node("b", NodePolicy::default())
                .add_edge(OPEN_SEA, "a")
                .add_edge("a", "b")
                .add_edge("b", ROOKERY)
                .build()
                .unwrap(),
        );
        let runtime = FlowRuntimeBuilder::<i32>::new(graph).with_node("a", Arc::new(RouteToNowhere)).with_node("b", Arc::new(Increment)).start();

        runtime.submit("a", 1, headers(), "trace-bad-route", None).await.unwrap();
        let out = tokio::time::timeout(std::time::Duration::from_millis(200), runtime.recv_terminal()).await.unwrap().unwrap();
        match &out.payload {
            Payload::Error(e) => assert_eq!(e.code, ErrorCode::RoutingInvalid),
            _ => panic!("expected a routing-invalid error payload"),
        }
    }

    #[tokio::test]
    async fn node_failure_routes_error_envelope_to_rookery() {
        let graph =
            Arc::new(FlowGraphBuilder::new().add_node("a", NodePolicy::default()).add_edge(OPEN_SEA, "a").add_edge("a", ROOKERY).build().unwrap());
        let runtime = FlowRuntimeBuilder::<i32>::new(graph).with_node("a", Arc::new(AlwaysFails)).start();

        runtime.submit("a", 1, headers(), "trace-2", None).await.unwrap();
        let out = runtime.recv_terminal().await.unwrap();
        assert!(out.payload.is_error());
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits_to_deadline_exceeded() {
        let graph =
            Arc::new(FlowGraphBuilder::new().add_node("a", NodePolicy::default()).add_edge(OPEN_SEA, "a").add_edge("a", ROOKERY).build().unwrap());
        let runtime = FlowRuntimeBuilder::<i32>::new(graph).with_node("a", Arc::new(Increment)).start();

        let past = chrono::Utc::now() - chrono::Duration::seconds(5);
        runtime.submit("a", 1, headers(), "trace-3", Some(past)).await.unwrap();
        let out = runtime.recv_terminal().await.unwrap();
        match &out.payload {
            Payload::Error(e) => assert_eq!(e.code, ErrorCode::DeadlineExceeded),
            _ => panic!("expected an error payload"),
        }
    }

    #[tokio::test]
    async fn cancelling_a_trace_yields_one_terminal_cancelled_envelope() {
        let graph = Arc::new(
            FlowGraphBuilder::new()
                .add_node("a", NodePolicy::default())
                .add_edge(OPEN_SEA, "a")
                .add_edge("a", ROOKERY)
                .build()
                .unwrap(),
        );
        let runtime = FlowRuntimeBuilder::<i32>::new(graph).with_node("a", Arc::new(Increment)).start();

        runtime.cancel("trace-4");
        runtime.submit("a", 1, headers(), "trace-4", None).await.unwrap();
        let out = tokio::time::timeout(std::time::Duration::from_millis(200), runtime.recv_terminal())
            .await
            .expect("a cancelled trace must still reach ROOKERY with a terminal envelope")
            .unwrap();
        match &out.payload {
            Payload::Error(e) => assert_eq!(e.code, ErrorCode::Cancelled),
            _ => panic!("expected a cancelled error payload"),
        }
        assert_eq!(out.trace_id, "trace-4");
    }

    #[tokio::test]
    async fn call_playbook_cancels_sub_flow_when_parent_cancels() {
        struct Never;
        #[async_trait]
        impl Node<i32> for Never {
            async fn call(&self, _input: i32) -> Result<Vec<NodeOutput<i32>>, NodeFailure> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let graph = Arc::new(
            FlowGraphBuilder::new()
                .add_node("a", NodePolicy::default())
                .add_edge(OPEN_SEA, "a")
                .add_edge("a", ROOKERY)
                .build()
                .unwrap(),
        );
        let sub_flow = FlowRuntimeBuilder::<i32>::new(graph).with_node("a", Arc::new(Never)).start();

        let parent_map = CancelMap::new();
        let parent_token = parent_map.register("parent-trace");
        let parent_envelope = MessageEnvelope::ingress(1, headers(), "parent-trace", None);

        let call = tokio::spawn(async move { call_playbook(&sub_flow, "a", &parent_envelope, &parent_token, 1).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        parent_map.cancel("parent-trace");

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), call)
            .await
            .expect("call_playbook must return once the parent cancels")
            .unwrap();
        let envelope = result.unwrap();
        match &envelope.payload {
            Payload::Error(e) => assert_eq!(e.code, ErrorCode::Cancelled),
            _ => panic!("expected a cancelled error payload"),
        }
    }
}
