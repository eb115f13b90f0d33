//! Flow graph assembly: arena-indexed nodes plus the two sentinel
//! endpoints `OPEN_SEA` (ingress) and `ROOKERY` (egress), assembled from a
//! list of `(upstream, downstream)` edges and checked for cycles via
//! topological sort. Index-based (`NodeId(usize)`) rather than `Rc`-linked,
//! so the graph carries no reference cycles of its own.

use std::collections::{HashMap, HashSet, VecDeque};

use rf_core::policy::NodePolicy;
use rf_core::{Error, Result};

pub const OPEN_SEA: &str = "OPEN_SEA";
pub const ROOKERY: &str = "ROOKERY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

pub struct NodeSpec {
    pub name: String,
    pub policy: NodePolicy,
}

pub struct FlowGraph {
    nodes: Vec<NodeSpec>,
    name_to_id: HashMap<String, NodeId>,
    /// Adjacency among real nodes only; `OPEN_SEA`/`ROOKERY` edges are
    /// tracked separately since they are not arena members.
    edges: HashMap<NodeId, Vec<NodeId>>,
    ingress: HashSet<NodeId>,
    egress: HashSet<NodeId>,
}

impl FlowGraph {
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &NodeSpec {
        &self.nodes[id.0]
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.edges.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_ingress(&self, id: NodeId) -> bool {
        self.ingress.contains(&id)
    }

    pub fn is_egress(&self, id: NodeId) -> bool {
        self.egress.contains(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }
}

pub struct FlowGraphBuilder {
    nodes: Vec<NodeSpec>,
    name_to_id: HashMap<String, NodeId>,
    edges: Vec<(String, String)>,
}

impl Default for FlowGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraphBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), name_to_id: HashMap::new(), edges: Vec::new() }
    }

    pub fn add_node(mut self, name: impl Into<String>, policy: NodePolicy) -> Self {
        let name = name.into();
        let id = NodeId(self.nodes.len());
        self.name_to_id.insert(name.clone(), id);
        self.nodes.push(NodeSpec { name, policy });
        self
    }

    /// Declare an edge. `upstream`/`downstream` may be `OPEN_SEA`/`ROOKERY`.
    pub fn add_edge(mut self, upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        self.edges.push((upstream.into(), downstream.into()));
        self
    }

    /// Assemble the graph, rejecting cycles via topological sort (Kahn's
    /// algorithm) unless every node on the cycle allows it via
    /// `policy.allow_cyclic`.
    pub fn build(self) -> Result<FlowGraph> {
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut ingress = HashSet::new();
        let mut egress = HashSet::new();

        for (upstream, downstream) in &self.edges {
            let up_is_source = upstream == OPEN_SEA;
            let down_is_sink = downstream == ROOKERY;

            if up_is_source {
                let target = self.resolve(downstream)?;
                ingress.insert(target);
                continue;
            }
            if down_is_sink {
                let source = self.resolve(upstream)?;
                egress.insert(source);
                continue;
            }
            let source = self.resolve(upstream)?;
            let target = self.resolve(downstream)?;
            edges.entry(source).or_default().push(target);
        }

        check_acyclic(&self.nodes, &edges)?;
        check_reachability(&self.nodes, &edges, &ingress, &egress)?;

        Ok(FlowGraph { nodes: self.nodes, name_to_id: self.name_to_id, edges, ingress, egress })
    }

    fn resolve(&self, name: &str) -> Result<NodeId> {
        self.name_to_id.get(name).copied().ok_or_else(|| Error::Config(format!("unknown node '{name}' in edge declaration")))
    }
}

fn check_acyclic(nodes: &[NodeSpec], edges: &HashMap<NodeId, Vec<NodeId>>) -> Result<()> {
    let mut in_degree: HashMap<NodeId, usize> = (0..nodes.len()).map(|i| (NodeId(i), 0)).collect();
    for targets in edges.values() {
        for t in targets {
            *in_degree.get_mut(t).unwrap() += 1;
        }
    }

    let mut queue: VecDeque<NodeId> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for &t in edges.get(&id).map(|v| v.as_slice()).unwrap_or(&[]) {
            let d = in_degree.get_mut(&t).unwrap();
            *d -= 1;
            if *d == 0 {
                queue.push_back(t);
            }
        }
    }

    if visited < nodes.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(id, _)| nodes[id.0].name.as_str())
            .collect();
        let any_allows_cyclic = cyclic.iter().any(|name| {
            nodes.iter().find(|n| n.name == *name).map(|n| n.policy.allow_cyclic).unwrap_or(false)
        });
        if !any_allows_cyclic {
            return Err(Error::Validation(format!("FLOW_CYCLIC: cycle detected among nodes {cyclic:?}")));
        }
    }
    Ok(())
}

fn check_reachability(
    nodes: &[NodeSpec],
    edges: &HashMap<NodeId, Vec<NodeId>>,
    ingress: &HashSet<NodeId>,
    egress: &HashSet<NodeId>,
) -> Result<()> {
    let mut reachable = HashSet::new();
    let mut queue: VecDeque<NodeId> = ingress.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        for &t in edges.get(&id).map(|v| v.as_slice()).unwrap_or(&[]) {
            queue.push_back(t);
        }
    }
    for i in 0..nodes.len() {
        let id = NodeId(i);
        if !reachable.contains(&id) {
            return Err(Error::Validation(format!("node '{}' is not reachable from OPEN_SEA", nodes[i].name)));
        }
    }

    for i in 0..nodes.len() {
        let id = NodeId(i);
        let is_terminal = edges.get(&id).map(|v| v.is_empty()).unwrap_or(true);
        if is_terminal && !egress.contains(&id) {
            return Err(Error::Validation(format!("terminal node '{}' does not reach ROOKERY", nodes[i].name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NodePolicy {
        NodePolicy::default()
    }

    #[test]
    fn simple_linear_graph_builds() {
        let graph = FlowGraphBuilder::new()
            .add_node("a", policy())
            .add_node("b", policy())
            .add_edge(OPEN_SEA, "a")
            .add_edge("a", "b")
            .add_edge("b", ROOKERY)
            .build()
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert!(graph.is_ingress(graph.node_id("a").unwrap()));
        assert!(graph.is_egress(graph.node_id("b").unwrap()));
    }

    #[test]
    fn cycle_without_allow_cyclic_is_rejected() {
        let result = FlowGraphBuilder::new()
            .add_node("a", policy())
            .add_node("b", policy())
            .add_edge(OPEN_SEA, "a")
            .add_edge("a", "b")
            .add_edge("b", "a")
            .add_edge("b", ROOKERY)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn cycle_with_allow_cyclic_is_accepted() {
        let mut cyclic_policy = policy();
        cyclic_policy.allow_cyclic = true;
        let result = FlowGraphBuilder::new()
            .add_node("a", policy())
            .add_node("b", cyclic_policy)
            .add_edge(OPEN_SEA, "a")
            .add_edge("a", "b")
            .add_edge("b", "a")
            .add_edge("b", ROOKERY)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let result = FlowGraphBuilder::new()
            .add_node("a", policy())
            .add_node("orphan", policy())
            .add_edge(OPEN_SEA, "a")
            .add_edge("a", ROOKERY)
            .build();
        assert!(result.is_err());
    }
}
