/// Compiled flow cache using ArcSwap
///
/// Flows are loaded from storage by ID and compiled once per stored revision. The compiled
/// form holds a petgraph view of the nodes and edges plus the detected start node, so
/// structural problems surface at load time rather than mid-execution.
/// Readers never block; updates swap the whole map pointer.

use crate::flow::{
    error::FlowError,
    storage::{FlowStorage, StoredFlow},
    types::{Edge, Flow, FlowNode},
};
use crate::runtime::template;
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Execution-ready flow with its graph and start node
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    flow: Flow,
    revision: String,
    /// Node weights index into `flow.nodes`, edge weights into `flow.edges`
    graph: DiGraph<usize, usize>,
    node_id_to_index: HashMap<String, NodeIndex>,
    start: NodeIndex,
    /// True when no node lacked incoming edges and the first node was used instead
    start_is_fallback: bool,
}

impl CompiledFlow {
    /// Build the graph and detect the start node
    ///
    /// The start node is the first node (in list order) without incoming edges. When every
    /// node has an incoming edge the first node is used and the fallback is flagged.
    pub fn compile(flow: Flow, revision: impl Into<String>) -> Result<Self, FlowError> {
        if flow.nodes.is_empty() {
            return Err(FlowError::Empty(flow.id.clone()));
        }

        let mut graph = DiGraph::with_capacity(flow.nodes.len(), flow.edges.len());
        let mut node_id_to_index = HashMap::with_capacity(flow.nodes.len());

        for (position, node) in flow.nodes.iter().enumerate() {
            let index = graph.add_node(position);
            if node_id_to_index.insert(node.id.clone(), index).is_some() {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
        }

        for (position, edge) in flow.edges.iter().enumerate() {
            let endpoint = |id: &str| {
                node_id_to_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| FlowError::UnknownEdgeEndpoint {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: id.to_string(),
                    })
            };
            let from = endpoint(&edge.source)?;
            let to = endpoint(&edge.target)?;
            graph.add_edge(from, to, position);
        }

        let root = graph
            .node_indices()
            .find(|&index| graph.neighbors_directed(index, Direction::Incoming).next().is_none());
        let (start, start_is_fallback) = match root {
            Some(index) => (index, false),
            None => (NodeIndex::new(0), true),
        };

        if is_cyclic_directed(&graph) {
            tracing::debug!("🔁 Flow '{}' contains cycles; walks are bounded by the step limit", flow.id);
        }

        Ok(Self {
            flow,
            revision: revision.into(),
            graph,
            node_id_to_index,
            start,
            start_is_fallback,
        })
    }

    pub fn id(&self) -> &str {
        &self.flow.id
    }

    pub fn name(&self) -> &str {
        &self.flow.name
    }

    pub fn is_active(&self) -> bool {
        self.flow.is_active
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.node_id_to_index.get(id).map(|&index| self.node_at(index))
    }

    fn node_at(&self, index: NodeIndex) -> &FlowNode {
        &self.flow.nodes[self.graph[index]]
    }

    /// The node execution begins at
    pub fn start_node(&self) -> &FlowNode {
        self.node_at(self.start)
    }

    pub fn start_is_fallback(&self) -> bool {
        self.start_is_fallback
    }

    /// Reject flows whose start node could only be guessed
    pub fn require_start_node(&self) -> Result<(), FlowError> {
        if self.start_is_fallback {
            Err(FlowError::NoStartNode(self.flow.id.clone()))
        } else {
            Ok(())
        }
    }

    /// Outgoing edges of a node in definition order
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };

        // petgraph yields edges newest-first; restore the order of the edge list
        let mut positions: Vec<usize> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| *edge.weight())
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|position| &self.flow.edges[position]).collect()
    }

    /// Pick the target of the first outgoing edge whose condition holds
    ///
    /// Unconditional edges always match.
    pub fn next_node(&self, node_id: &str, context: &Value) -> Option<&FlowNode> {
        self.outgoing(node_id)
            .into_iter()
            .find(|edge| match edge.condition() {
                Some(condition) => template::evaluate_condition(condition, context),
                None => true,
            })
            .and_then(|edge| self.node(&edge.target))
    }

    /// Target of the first unconditional outgoing edge
    pub fn unconditional_next(&self, node_id: &str) -> Option<&FlowNode> {
        self.outgoing(node_id)
            .into_iter()
            .find(|edge| edge.is_unconditional())
            .and_then(|edge| self.node(&edge.target))
    }
}

/// Lock-free registry of compiled flows backed by storage
#[derive(Debug)]
pub struct FlowRegistry {
    flows: ArcSwap<HashMap<String, Arc<CompiledFlow>>>,
    storage: FlowStorage,
}

impl FlowRegistry {
    pub fn new(storage: FlowStorage) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Compile every stored flow into the cache
    ///
    /// Flows that fail to compile are skipped and logged; they fail again on load.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_flows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());

        for StoredFlow { flow, revision } in stored {
            let id = flow.id.clone();
            match CompiledFlow::compile(flow, revision) {
                Ok(flow) => {
                    compiled.insert(id, Arc::new(flow));
                }
                Err(e) => tracing::warn!("⚠️ Skipping flow '{}': {}", id, e),
            }
        }

        self.flows.store(Arc::new(compiled));
        tracing::info!("📊 Initialized flow registry with {} flows", self.flows.load().len());
        Ok(())
    }

    /// Load a flow by ID from storage, reusing the cached compilation when unchanged
    ///
    /// Returns `None` when the flow does not exist. Inactive flows are returned as-is;
    /// callers decide whether to run them.
    pub async fn load(&self, flow_id: &str) -> Result<Option<Arc<CompiledFlow>>> {
        let Some(stored) = self.storage.get_stored_flow(flow_id).await? else {
            self.evict(flow_id);
            return Ok(None);
        };

        if let Some(cached) = self.cached(flow_id) {
            if cached.revision() == stored.revision {
                tracing::debug!("♻️ Using cached compilation of flow '{}'", flow_id);
                return Ok(Some(cached));
            }
        }

        let compiled = Arc::new(CompiledFlow::compile(stored.flow, stored.revision)?);
        self.insert(Arc::clone(&compiled));
        tracing::info!("🔥 Compiled flow '{}' (revision {})", flow_id, compiled.revision());
        Ok(Some(compiled))
    }

    /// Lock-free read of the cached compilation
    pub fn cached(&self, flow_id: &str) -> Option<Arc<CompiledFlow>> {
        self.flows.load().get(flow_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.flows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, compiled: Arc<CompiledFlow>) {
        self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(compiled.id().to_string(), Arc::clone(&compiled));
            next
        });
    }

    /// Drop a flow from the cache
    pub fn evict(&self, flow_id: &str) {
        if self.cached(flow_id).is_none() {
            return;
        }
        self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(flow_id);
            next
        });
        tracing::info!("🗑️ Evicted flow from registry: {}", flow_id);
    }
}
