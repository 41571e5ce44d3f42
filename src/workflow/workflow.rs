//! Runtime workflow representation using a directed graph.
//!
//! Wraps the workflow model in a petgraph `DiGraph` for traversal. The graph
//! is built once per execution request and never mutated afterwards, so it is
//! shared as `Arc<Workflow>` between the engine and every job context.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};
use serde::Serialize;

use crate::{
    PlugflowError, Result, WorkflowModel,
    workflow::{
        edge::Edge,
        node::{Node, NodeData, NodeId, NodeType},
    },
};

/// One column of an exposure listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingColumn {
    pub path: String,
    pub label: String,
}

/// Immutable workflow graph.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    graph: DiGraph<Node, Edge>,
    /// node id -> graph index, in declaration order
    index: HashMap<NodeId, NodeIndex>,
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// get node by id
    pub fn get_node(
        &self,
        id: &str,
    ) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn nodes_of_type(
        &self,
        node_type: NodeType,
    ) -> Vec<&Node> {
        self.nodes().filter(|n| n.node_type == node_type).collect()
    }

    /// Kahn's algorithm over in-degree counts.
    ///
    /// On a cyclic graph the nodes on (or behind) a cycle never reach
    /// in-degree zero, so the result is shorter than [`Workflow::node_count`].
    pub fn topological_sort(&self) -> Vec<&Node> {
        let mut in_degree: HashMap<NodeIndex, usize> = self.graph.node_indices().map(|idx| (idx, self.graph.edges_directed(idx, Direction::Incoming).count())).collect();

        let mut queue: VecDeque<NodeIndex> = self.graph.node_indices().filter(|idx| in_degree[idx] == 0).collect();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(idx) = queue.pop_front() {
            order.push(&self.graph[idx]);
            // petgraph walks adjacency newest-first; reverse to keep edge declaration order
            let mut children: Vec<NodeIndex> = self.graph.edges_directed(idx, Direction::Outgoing).map(|e| e.target()).collect();
            children.reverse();
            for child in children {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        order
    }

    /// Reject graphs the engine must never schedule.
    pub fn validate(&self) -> Result<()> {
        for idx in self.graph.node_indices() {
            let parents = self.graph.edges_directed(idx, Direction::Incoming).count();
            if parents > 1 {
                return Err(PlugflowError::Validation(format!("node {} has {} incoming edges, branch merges are not supported", self.graph[idx].id, parents)));
            }
        }

        let sorted = self.topological_sort().len();
        if sorted < self.graph.node_count() {
            return Err(PlugflowError::Validation(format!(
                "workflow {} contains a cycle ({} of {} nodes sortable)",
                self.id,
                sorted,
                self.graph.node_count()
            )));
        }

        Ok(())
    }

    /// BFS over incoming edges, first node of `node_type` wins.
    pub fn find_ancestor_by_type(
        &self,
        node_id: &str,
        node_type: NodeType,
    ) -> Option<&Node> {
        self.find_by_type(node_id, node_type, Direction::Incoming)
    }

    /// BFS over outgoing edges, first node of `node_type` wins.
    pub fn find_descendant_by_type(
        &self,
        node_id: &str,
        node_type: NodeType,
    ) -> Option<&Node> {
        self.find_by_type(node_id, node_type, Direction::Outgoing)
    }

    fn find_by_type(
        &self,
        node_id: &str,
        node_type: NodeType,
        direction: Direction,
    ) -> Option<&Node> {
        let start = *self.index.get(node_id)?;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for neighbor in self.neighbors_in_order(current, direction) {
                let node = &self.graph[neighbor];
                if node.node_type == node_type {
                    return Some(node);
                }
                queue.push_back(neighbor);
            }
        }

        None
    }

    /// Walk the single-parent chain upwards until a node of `node_type`.
    pub fn find_parent_by_type(
        &self,
        node_id: &str,
        node_type: NodeType,
    ) -> Option<&Node> {
        let mut current = *self.index.get(node_id)?;
        let mut visited = HashSet::new();

        while visited.insert(current) {
            let parent = self.graph.edges_directed(current, Direction::Incoming).last().map(|e| e.source())?;
            if self.graph[parent].node_type == node_type {
                return Some(&self.graph[parent]);
            }
            current = parent;
        }

        None
    }

    /// Every node reachable from `node_id` through edges leaving it via `handle`.
    pub fn find_descendant_nodes_on_branch(
        &self,
        node_id: &str,
        handle: &str,
    ) -> Vec<NodeId> {
        let Some(start) = self.index.get(node_id) else {
            return Vec::new();
        };

        let mut queue: VecDeque<NodeIndex> = self.graph.edges_directed(*start, Direction::Outgoing).filter(|e| e.weight().leaves_through(handle)).map(|e| e.target()).collect();
        let mut visited = HashSet::new();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            result.push(self.graph[current].id.clone());
            queue.extend(self.neighbors_in_order(current, Direction::Outgoing));
        }

        result
    }

    pub fn find_exposure_by_name(
        &self,
        name: &str,
    ) -> Option<&Node> {
        self.nodes().find(|n| matches!(&n.data, NodeData::Exposure(data) if data.name == name))
    }

    /// Columns of the first listing visualizer below the named exposure.
    pub fn listing_columns(
        &self,
        exposure_name: &str,
    ) -> Vec<ListingColumn> {
        let Some(exposure) = self.find_exposure_by_name(exposure_name) else {
            return Vec::new();
        };
        let Some(start) = self.index.get(&exposure.id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([*start]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for child in self.neighbors_in_order(current, Direction::Outgoing) {
                if let NodeData::Visualizers(data) = &self.graph[child].data
                    && let Some(listing) = &data.listing
                {
                    return listing
                        .iter()
                        .map(|(path, label)| ListingColumn {
                            path: path.clone(),
                            label: label.as_str().map(str::to_string).unwrap_or_else(|| label.to_string()),
                        })
                        .collect();
                }
                queue.push_back(child);
            }
        }

        Vec::new()
    }

    fn neighbors_in_order(
        &self,
        idx: NodeIndex,
        direction: Direction,
    ) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| match direction {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            })
            .collect();
        neighbors.reverse();
        neighbors
    }
}

impl TryFrom<&WorkflowModel> for Workflow {
    type Error = PlugflowError;

    fn try_from(model: &WorkflowModel) -> Result<Self> {
        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut index = HashMap::new();

        for node_model in model.nodes.iter() {
            let node = Node::new(node_model)?;
            let nid = node.id.clone();
            if index.contains_key(&nid) {
                return Err(PlugflowError::Validation(format!("duplicate node id {}", nid)));
            }
            let node_idx = graph.add_node(node);
            index.insert(nid, node_idx);
        }
        for edge_model in model.edges.iter() {
            let edge = Edge::from(edge_model);
            let source = index.get(&edge.source).ok_or(PlugflowError::Validation(format!("edge {}: source node {} not found", edge.id, edge.source)))?;
            let target = index.get(&edge.target).ok_or(PlugflowError::Validation(format!("edge {}: target node {} not found", edge.id, edge.target)))?;
            graph.add_edge(*source, *target, edge);
        }

        Ok(Self {
            id: model.id.clone(),
            graph,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn workflow(value: serde_json::Value) -> Workflow {
        let model: WorkflowModel = serde_json::from_value(value).unwrap();
        Workflow::try_from(&model).unwrap()
    }

    fn chain() -> Workflow {
        workflow(json!({
            "id": "chain",
            "nodes": [
                {"id": "exp", "type": "export", "data": {"exporter": "MeshExporter", "type": "glb"}},
                {"id": "ctx", "type": "context", "data": {"source": "trajectory-dumps"}},
                {"id": "fe", "type": "foreach", "data": {"iterableSource": "ctx.trajectory_dumps"}},
                {"id": "ep", "type": "entrypoint", "data": {"binary": "/bin/true", "arguments": ""}},
                {"id": "xp", "type": "exposure", "data": {"name": "Atoms", "results": "atoms.json"}},
                {"id": "vis", "type": "visualizers", "data": {"listing": {"count": "Count"}}}
            ],
            "edges": [
                {"id": "e1", "source": "ctx", "target": "fe"},
                {"id": "e2", "source": "fe", "target": "ep"},
                {"id": "e3", "source": "ep", "target": "xp"},
                {"id": "e4", "source": "xp", "target": "exp"},
                {"id": "e5", "source": "xp", "target": "vis"}
            ]
        }))
    }

    fn branching() -> Workflow {
        workflow(json!({
            "nodes": [
                {"id": "if", "type": "if-statement", "data": {"conditions": []}},
                {"id": "t1", "type": "schema", "data": {"definition": {}}},
                {"id": "t2", "type": "visualizers", "data": {}},
                {"id": "f1", "type": "schema", "data": {"definition": {}}},
                {"id": "plain", "type": "visualizers", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "if", "target": "t1", "sourceHandle": "output-true"},
                {"id": "e2", "source": "t1", "target": "t2"},
                {"id": "e3", "source": "if", "target": "f1", "sourceHandle": "output-false"},
                {"id": "e4", "source": "if", "target": "plain"}
            ]
        }))
    }

    fn position_of(
        order: &[&Node],
        id: &str,
    ) -> usize {
        order.iter().position(|n| n.id == id).unwrap()
    }

    #[test]
    fn test_topological_sort_orders_every_edge() {
        let wf = chain();
        let order = wf.topological_sort();
        assert_eq!(order.len(), wf.node_count());
        for edge in wf.edges() {
            assert!(position_of(&order, &edge.source) < position_of(&order, &edge.target), "{} must precede {}", edge.source, edge.target);
        }
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_topological_sort_short_on_cycle() {
        let wf = workflow(json!({
            "nodes": [
                {"id": "a", "type": "schema", "data": {"definition": {}}},
                {"id": "b", "type": "schema", "data": {"definition": {}}},
                {"id": "c", "type": "schema", "data": {"definition": {}}},
                {"id": "d", "type": "schema", "data": {"definition": {}}}
            ],
            "edges": [
                {"id": "e1", "source": "b", "target": "c"},
                {"id": "e2", "source": "c", "target": "b"},
                {"id": "e3", "source": "a", "target": "d"}
            ]
        }));
        let order = wf.topological_sort();
        assert!(order.len() < wf.node_count());
        assert_eq!(order.len(), 2);

        let err = wf.validate().unwrap_err();
        assert!(matches!(err, PlugflowError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_merges() {
        let wf = workflow(json!({
            "nodes": [
                {"id": "a", "type": "schema", "data": {"definition": {}}},
                {"id": "b", "type": "schema", "data": {"definition": {}}},
                {"id": "c", "type": "schema", "data": {"definition": {}}}
            ],
            "edges": [
                {"id": "e1", "source": "a", "target": "c"},
                {"id": "e2", "source": "b", "target": "c"}
            ]
        }));
        assert!(matches!(wf.validate(), Err(PlugflowError::Validation(_))));
    }

    #[test]
    fn test_build_rejects_dangling_edge_and_duplicates() {
        let model: WorkflowModel = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "schema", "data": {"definition": {}}}],
            "edges": [{"id": "e1", "source": "a", "target": "ghost"}]
        }))
        .unwrap();
        assert!(matches!(Workflow::try_from(&model), Err(PlugflowError::Validation(_))));

        let model: WorkflowModel = serde_json::from_value(json!({
            "nodes": [
                {"id": "a", "type": "schema", "data": {"definition": {}}},
                {"id": "a", "type": "schema", "data": {"definition": {}}}
            ],
            "edges": []
        }))
        .unwrap();
        assert!(matches!(Workflow::try_from(&model), Err(PlugflowError::Validation(_))));
    }

    #[test]
    fn test_find_by_type() {
        let wf = chain();
        assert_eq!(wf.find_ancestor_by_type("exp", NodeType::ForEach).map(|n| n.id.as_str()), Some("fe"));
        assert_eq!(wf.find_descendant_by_type("fe", NodeType::Export).map(|n| n.id.as_str()), Some("exp"));
        assert_eq!(wf.find_parent_by_type("exp", NodeType::Exposure).map(|n| n.id.as_str()), Some("xp"));
        assert!(wf.find_descendant_by_type("exp", NodeType::Context).is_none());
        assert!(wf.find_ancestor_by_type("ctx", NodeType::Context).is_none());
        assert!(wf.find_descendant_by_type("missing", NodeType::Export).is_none());
    }

    #[test]
    fn test_branch_descendants() {
        let wf = branching();
        let mut on_true = wf.find_descendant_nodes_on_branch("if", "output-true");
        on_true.sort();
        assert_eq!(on_true, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(wf.find_descendant_nodes_on_branch("if", "output-false"), vec!["f1".to_string()]);
        assert!(wf.find_descendant_nodes_on_branch("t2", "output-true").is_empty());
    }

    #[test]
    fn test_exposure_queries() {
        let wf = chain();
        assert_eq!(wf.find_exposure_by_name("Atoms").map(|n| n.id.as_str()), Some("xp"));
        assert_eq!(
            wf.listing_columns("Atoms"),
            vec![ListingColumn {
                path: "count".to_string(),
                label: "Count".to_string(),
            }]
        );
        assert!(wf.listing_columns("Nope").is_empty());
        assert_eq!(wf.nodes_of_type(NodeType::Exposure).len(), 1);
    }
}
