//! The graph model (component D): nodes, edges, port identities, and
//! topology queries, built on a `petgraph::stable_graph::StableDiGraph` the
//! way the rest of this crate's lineage abstracts its flow graphs.

use std::sync::Arc;

use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{DfsPostOrder, EdgeRef};
use petgraph::Direction;

use crate::block::{Block, BlockId};
use crate::error::{ConstructionResult, GraphConstructionError};
use crate::port::PortSpec;
use crate::signature::Signature;
use crate::types::{SampleType, TypeRegistry};

pub(crate) type NodeIndex = petgraph::graph::NodeIndex<u32>;
pub(crate) type EdgeIndex = petgraph::graph::EdgeIndex<u32>;

/// An edge's port identity and, once the graph has been resolved, its
/// concrete type and rate.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source_output: usize,
    pub target_input: usize,
    pub(crate) resolved_type: Option<SampleType>,
    pub(crate) rate: Option<f64>,
}

pub(crate) struct NodeData {
    pub block: Box<dyn Block>,
    pub input_specs: Vec<PortSpec>,
    pub output_specs: Vec<PortSpec>,
    pub signatures: Vec<Signature>,
    pub resolved_signature: Option<Signature>,
    pub resolved_input_rate: Option<f64>,
    pub allows_feedback: bool,
}

/// The flow graph: a set of blocks and a set of edges between their ports.
/// Mutable during build; frozen at `start()`, at which point resolution,
/// rate propagation, and scheduling take over.
pub struct Graph {
    pub(crate) digraph: StableDiGraph<NodeData, Edge, u32>,
    pub(crate) types: Arc<TypeRegistry>,
    frozen: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph backed by a fresh type registry pre-seeded
    /// with the built-in fixed types.
    pub fn new() -> Self {
        Self::with_types(Arc::new(TypeRegistry::new()))
    }

    /// Creates an empty graph sharing an existing type registry, e.g. one
    /// that already has custom types registered.
    pub fn with_types(types: Arc<TypeRegistry>) -> Self {
        Self {
            digraph: StableDiGraph::new(),
            types,
            frozen: false,
        }
    }

    /// The shared sample type registry.
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// `true` once `start()` has frozen the graph against further
    /// structural mutation.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn unfreeze(&mut self) {
        self.frozen = false;
    }

    fn ensure_mutable(&self) -> ConstructionResult<()> {
        if self.frozen {
            panic!("graph is frozen: cannot mutate a started graph before stop()");
        }
        Ok(())
    }

    /// Adds a block to the graph, returning its opaque id.
    pub fn add(&mut self, block: impl Block + 'static) -> BlockId {
        self.add_boxed(Box::new(block))
    }

    /// Adds an already-boxed block to the graph.
    pub fn add_boxed(&mut self, block: Box<dyn Block>) -> BlockId {
        let input_specs = block.input_ports();
        let output_specs = block.output_ports();
        let signatures = block.signatures();
        let allows_feedback = false;
        let idx = self.digraph.add_node(NodeData {
            block,
            input_specs,
            output_specs,
            signatures,
            resolved_signature: None,
            resolved_input_rate: None,
            allows_feedback,
        });
        BlockId(idx)
    }

    /// Removes a block and every edge touching it.
    pub fn remove(&mut self, block: BlockId) {
        self.digraph.remove_node(block.0);
    }

    /// Connects `source`'s output port `source_output` to `target`'s input
    /// port `target_input`. Rejects a second producer on an already-fed
    /// input port (`FanInConflict`), an out-of-bounds port index, and a
    /// connection that would introduce a cycle (unless `target` is a
    /// feedback merger).
    pub fn connect(
        &mut self,
        source: BlockId,
        source_output: usize,
        target: BlockId,
        target_input: usize,
    ) -> ConstructionResult<()> {
        self.ensure_mutable()?;

        let num_outputs = self.digraph[source.0].output_specs.len();
        if source_output >= num_outputs {
            return Err(GraphConstructionError::PortOutOfBounds {
                block: source,
                direction: "output",
                index: source_output,
            });
        }
        let num_inputs = self.digraph[target.0].input_specs.len();
        if target_input >= num_inputs {
            return Err(GraphConstructionError::PortOutOfBounds {
                block: target,
                direction: "input",
                index: target_input,
            });
        }

        for edge in self.digraph.edges_directed(target.0, Direction::Incoming) {
            if edge.weight().target_input == target_input {
                return Err(GraphConstructionError::FanInConflict {
                    block: target,
                    input: target_input,
                });
            }
        }

        let allows_feedback = self.digraph[target.0].allows_feedback;
        if !allows_feedback && self.path_exists(target.0, source.0) {
            return Err(GraphConstructionError::Cycle { block: target });
        }
        if allows_feedback && source == target {
            log::warn!(
                "block {target:?} connects a feedback edge to itself (output {source_output} -> input {target_input})"
            );
        }

        self.digraph.add_edge(
            source.0,
            target.0,
            Edge {
                source_output,
                target_input,
                resolved_type: None,
                rate: None,
            },
        );
        Ok(())
    }

    /// Marks `block` as a feedback merger: connections into it are allowed
    /// to close a cycle. Not required by the core; opt-in only.
    pub fn allow_feedback(&mut self, block: BlockId) {
        self.digraph[block.0].allows_feedback = true;
    }

    fn path_exists(&self, from: NodeIndex, to: NodeIndex) -> bool {
        use petgraph::algo::has_path_connecting;
        has_path_connecting(&self.digraph, from, to, None)
    }

    /// Blocks with no input ports carrying an inbound edge (the graph's
    /// sources).
    pub fn sources(&self) -> Vec<BlockId> {
        self.digraph
            .externals(Direction::Incoming)
            .map(BlockId)
            .collect()
    }

    /// Blocks with no outgoing edges (the graph's sinks).
    pub fn sinks(&self) -> Vec<BlockId> {
        self.digraph
            .externals(Direction::Outgoing)
            .map(BlockId)
            .collect()
    }

    /// Blocks in topological order (sources before the blocks that consume
    /// their output).
    pub fn topological_order(&self) -> Vec<BlockId> {
        let mut visitor = DfsPostOrder::default();
        let mut order = Vec::with_capacity(self.digraph.node_count());
        for start in self.digraph.externals(Direction::Incoming) {
            visitor.move_to(start);
            while let Some(n) = visitor.next(&self.digraph) {
                order.push(n);
            }
        }
        // any node unreachable from a source (shouldn't happen once every
        // input is connected, but stay robust during graph construction)
        for n in self.digraph.node_indices() {
            if !order.contains(&n) {
                order.push(n);
            }
        }
        order.reverse();
        order.into_iter().map(BlockId).collect()
    }

    /// Blocks in reverse topological order (sinks before their producers).
    pub fn reverse_topological(&self) -> Vec<BlockId> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// The number of blocks currently in the graph.
    pub fn node_count(&self) -> usize {
        self.digraph.node_count()
    }

    /// The number of edges currently in the graph.
    pub fn edge_count(&self) -> usize {
        self.digraph.edge_count()
    }

    pub(crate) fn node(&self, id: BlockId) -> &NodeData {
        &self.digraph[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: BlockId) -> &mut NodeData {
        &mut self.digraph[id.0]
    }

    /// Incoming edges to `block`, as `(edge_index, edge)` pairs.
    pub(crate) fn incoming(&self, block: BlockId) -> Vec<(EdgeIndex, &Edge)> {
        self.digraph
            .edges_directed(block.0, Direction::Incoming)
            .map(|e| (e.id(), e.weight()))
            .collect()
    }

    /// Incoming edges to `block`, as `(source, edge)` pairs.
    pub(crate) fn incoming_with_source(&self, block: BlockId) -> Vec<(BlockId, &Edge)> {
        self.digraph
            .edges_directed(block.0, Direction::Incoming)
            .map(|e| (BlockId(e.source()), e.weight()))
            .collect()
    }

    /// Outgoing edges from `block`, as `(edge_index, target, edge)` triples.
    pub(crate) fn outgoing(&self, block: BlockId) -> Vec<(EdgeIndex, BlockId, &Edge)> {
        self.digraph
            .edges_directed(block.0, Direction::Outgoing)
            .map(|e| (e.id(), BlockId(e.target()), e.weight()))
            .collect()
    }

    pub(crate) fn edge_mut(&mut self, idx: EdgeIndex) -> &mut Edge {
        &mut self.digraph[idx]
    }

    pub(crate) fn all_block_ids(&self) -> Vec<BlockId> {
        self.digraph.node_indices().map(BlockId).collect()
    }

    /// Input ports with no inbound edge, as `(block, input_index)` pairs.
    /// The graph invariant requires this to be empty by `start()`.
    pub(crate) fn unconnected_inputs(&self) -> Vec<(BlockId, usize)> {
        let mut missing = Vec::new();
        for id in self.all_block_ids() {
            let n_inputs = self.digraph[id.0].input_specs.len();
            if n_inputs == 0 {
                continue;
            }
            let mut fed = vec![false; n_inputs];
            for (_, edge) in self.incoming(id) {
                fed[edge.target_input] = true;
            }
            for (input, &is_fed) in fed.iter().enumerate() {
                if !is_fed {
                    missing.push((id, input));
                }
            }
        }
        missing
    }

    /// Moves a block's implementation out of the graph, leaving a placeholder
    /// behind. Used once by the scheduler when handing each block off to its
    /// own execution unit; nothing in the graph consults a block's
    /// `process`/`initialize` hooks afterwards.
    pub(crate) fn take_block(&mut self, id: BlockId) -> Box<dyn Block> {
        struct Taken;
        impl Block for Taken {
            fn input_ports(&self) -> Vec<PortSpec> {
                vec![]
            }
            fn output_ports(&self) -> Vec<PortSpec> {
                vec![]
            }
            fn signatures(&self) -> Vec<Signature> {
                vec![Signature::new(vec![], vec![])]
            }
            fn process(
                &mut self,
                _: crate::block::Inputs<'_>,
                _: crate::block::Outputs<'_>,
            ) -> crate::error::BlockResult<crate::block::ProcessOutcome> {
                Ok(crate::block::ProcessOutcome::EndOfStream)
            }
        }
        std::mem::replace(&mut self.digraph[id.0].block, Box::new(Taken))
    }
}
