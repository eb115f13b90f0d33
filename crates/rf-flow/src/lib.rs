//! Dataflow execution: typed message envelopes flowing across a graph of
//! async nodes between the sentinel endpoints `OPEN_SEA` and `ROOKERY`.

pub mod cancel;
pub mod catalog;
pub mod executor;
pub mod floe;
pub mod graph;
pub mod middleware;
pub mod runtime;

pub use cancel::{CancelMap, CancelToken};
pub use catalog::{Catalog, CatalogEntry, CatalogFilter, SideEffect};
pub use executor::{execute, Node, NodeFailure};
pub use floe::{floe, Capacity, FloeError, FloeReceiver, FloeSender};
pub use graph::{FlowGraph, FlowGraphBuilder, NodeId, NodeSpec, OPEN_SEA, ROOKERY};
pub use middleware::{Middleware, MiddlewareChain, RuntimeEvent};
pub use runtime::{call_playbook, FlowRuntime, FlowRuntimeBuilder};
