//! Pipeline graph construction, propagation and disposal.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Each node owns its port
//! buffers and an [`EdgeRegistry`] mapping its output ports to ordered child
//! bindings. Execution is synchronous and depth-first: after a node's step,
//! if its gating predicate holds, every output port is pushed (declaration
//! order) to every bound child (registration order), and each child's whole
//! subtree finishes before the next edge is visited.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info, trace};

use crate::config::{Configuration, NodeConfig, NODE_MODULE};
use crate::data::FrameworkData;
use crate::error::{PipelineError, PipelineResult};
use crate::node::{Node, NodePorts, NodeState};
use crate::registry::NodeRegistry;

/// Stable identifier of a node within one graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Directed binding from an output port to a child's input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub target: NodeId,
    pub input: String,
}

/// Per-node edge records, keyed by output port.
#[derive(Debug, Default)]
pub struct EdgeRegistry {
    /// One entry per declared output port, in declaration order.
    edges: Vec<(&'static str, Vec<Edge>)>,
    /// Input ports already bound on each child, across all output ports.
    bound: HashMap<NodeId, HashSet<String>>,
}

impl EdgeRegistry {
    fn new(outputs: &[&'static str]) -> Self {
        Self {
            edges: outputs.iter().map(|&port| (port, Vec::new())).collect(),
            bound: HashMap::new(),
        }
    }

    /// Edges registered on `port`, in registration order.
    pub fn edges(&self, port: &str) -> &[Edge] {
        self.edges
            .iter()
            .find(|(name, _)| *name == port)
            .map(|(_, edges)| edges.as_slice())
            .unwrap_or_default()
    }

    /// Every edge, by output port then registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().flat_map(|(_, edges)| edges.iter())
    }

    pub fn is_bound(&self, child: NodeId, input: &str) -> bool {
        self.bound
            .get(&child)
            .is_some_and(|inputs| inputs.contains(input))
    }

    /// Records an edge; the caller has already checked `is_bound`.
    fn add(&mut self, port: &str, edge: Edge) -> PipelineResult<()> {
        let slot = self
            .edges
            .iter_mut()
            .find(|(name, _)| *name == port)
            .map(|(_, edges)| edges)
            .ok_or_else(|| {
                PipelineError::invalid_value(format!("output port '{port}'"), "unknown port")
            })?;
        self.bound
            .entry(edge.target)
            .or_default()
            .insert(edge.input.clone());
        slot.push(edge);
        Ok(())
    }
}

/// Represents a node in the pipeline graph.
pub struct PipelineNode {
    pub name: String,
    pub kind: String,
    node: Box<dyn Node>,
    ports: NodePorts,
    edges: EdgeRegistry,
    state: NodeState,
}

impl PipelineNode {
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn ports(&self) -> &NodePorts {
        &self.ports
    }

    pub fn edges(&self) -> &EdgeRegistry {
        &self.edges
    }
}

/// Represents the entire pipeline as a graph of connected nodes.
#[derive(Default)]
pub struct PipelineGraph {
    nodes: Vec<PipelineNode>,
    names: HashMap<String, NodeId>,
    topology: DiGraphMap<NodeId, ()>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a configuration document: every `root` and `common`
    /// node is created through the registry, then each node's `outputs` are wired.
    pub fn build(configuration: &Configuration, registry: &NodeRegistry) -> PipelineResult<Self> {
        let records = configuration
            .root_nodes()
            .iter()
            .chain(configuration.common_nodes())
            .map(|value| {
                NodeConfig::from_value(value).map(|record| record.with_base_dir(configuration.base_dir()))
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut graph = Self::new();
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            ids.push(graph.add_from_config(record, registry)?);
        }

        for (record, &parent) in records.iter().zip(&ids) {
            for (port, targets) in &record.outputs {
                for target in targets {
                    let child = graph.node_id(&target.node).ok_or_else(|| PipelineError::UnknownNode {
                        name: target.node.clone(),
                    })?;
                    graph.add_child(parent, port, child, &target.input)?;
                }
            }
        }

        info!("Pipeline graph built with {} nodes", graph.len());
        Ok(graph)
    }

    /// Creates a node through the registry and adds it to the graph.
    pub fn add_from_config(&mut self, config: &NodeConfig, registry: &NodeRegistry) -> PipelineResult<NodeId> {
        let node = registry.create_node(config)?;
        self.add_node(&config.name, &config.kind, node)
    }

    /// Adds a constructed node. Names must be unique within the graph.
    pub fn add_node(&mut self, name: &str, kind: &str, node: Box<dyn Node>) -> PipelineResult<NodeId> {
        if self.names.contains_key(name) {
            return Err(PipelineError::invalid_parameter(NODE_MODULE, "name", "already_exists"));
        }

        let id = NodeId(self.nodes.len());
        let ports = NodePorts::for_node(node.as_ref());
        let edges = EdgeRegistry::new(node.outputs());
        self.nodes.push(PipelineNode {
            name: name.to_string(),
            kind: kind.to_string(),
            node,
            ports,
            edges,
            state: NodeState::Constructed,
        });
        self.names.insert(name.to_string(), id);
        self.topology.add_node(id);
        debug!("Added node '{}' ({}) as {}", name, kind, id);
        Ok(id)
    }

    /// Binds `parent.output` to `child.input`.
    ///
    /// A `(child, input)` pair may be bound once per parent regardless of the
    /// output port used, and edges closing a cycle are rejected.
    pub fn add_child(&mut self, parent: NodeId, output: &str, child: NodeId, input: &str) -> PipelineResult<()> {
        let child_entry = self.entry(child)?;
        if !child_entry.ports.has_input(input) {
            return Err(PipelineError::invalid_value(
                format!("input port '{}.{}'", child_entry.name, input),
                "unknown port",
            ));
        }
        let child_name = child_entry.name.clone();

        let parent_entry = self.entry(parent)?;
        if !parent_entry.ports.has_output(output) {
            return Err(PipelineError::invalid_value(
                format!("output port '{}.{}'", parent_entry.name, output),
                "unknown port",
            ));
        }
        if parent_entry.edges.is_bound(child, input) {
            return Err(PipelineError::invalid_parameter(
                NODE_MODULE,
                &format!("outputs.{output}"),
                "already_added",
            ));
        }

        if has_path_connecting(&self.topology, child, parent, None) {
            return Err(PipelineError::CycleDetected {
                from: parent_entry.name.clone(),
                to: child_name,
            });
        }

        debug!("Edge {}.{} -> {}.{}", parent_entry.name, output, child_name, input);
        self.entry_mut(parent)?.edges.add(
            output,
            Edge {
                target: child,
                input: input.to_string(),
            },
        )?;
        self.topology.add_edge(parent, child, ());
        Ok(())
    }

    /// Runs a node and, if its gate opens, its downstream subtree.
    ///
    /// Non-generator nodes require `input`: the bound port and the data to
    /// merge into that port's buffer. Generators ignore it.
    pub fn run(&mut self, id: NodeId, input: Option<(&str, &FrameworkData)>) -> PipelineResult<()> {
        let entry = self.entry_mut(id)?;
        if entry.state == NodeState::Disposed {
            return Err(PipelineError::NodeDisposed {
                name: entry.name.clone(),
            });
        }

        let port = if entry.node.is_generator() {
            None
        } else {
            let (port, data) = input.ok_or_else(|| {
                PipelineError::invalid_value(format!("node '{}'", entry.name), "input data required")
            })?;
            entry.ports.input_mut(port)?.extend(data);
            Some(port)
        };

        entry.state = NodeState::Running;
        trace!("Running node '{}'", entry.name);
        entry.node.process(port, &mut entry.ports)?;

        if !entry.node.should_propagate(&entry.ports) {
            trace!("Node '{}' gate closed", entry.name);
            return Ok(());
        }
        self.call_children(id)
    }

    /// Runs a generator node with no input.
    pub fn run_source(&mut self, id: NodeId) -> PipelineResult<()> {
        self.run(id, None)
    }

    /// Runs every generator node once, in insertion order.
    pub fn run_roots(&mut self) -> PipelineResult<()> {
        for id in self.generators() {
            self.run(id, None)?;
        }
        Ok(())
    }

    fn call_children(&mut self, id: NodeId) -> PipelineResult<()> {
        let outputs = self.entry(id)?.node.outputs().to_vec();
        for port in outputs {
            let edges = self.entry(id)?.edges.edges(port).to_vec();
            if edges.is_empty() {
                continue;
            }

            // Nothing below this node can reach it again, so its buffer is lent
            // out for the duration of the subtree and restored afterwards.
            let output = self.entry_mut(id)?.ports.take_output(port)?;
            let result = self.push_to_children(id, port, &output, &edges);
            self.entry_mut(id)?.ports.replace_output(port, output)?;
            result?;
        }
        Ok(())
    }

    fn push_to_children(
        &mut self,
        id: NodeId,
        port: &str,
        output: &FrameworkData,
        edges: &[Edge],
    ) -> PipelineResult<()> {
        for edge in edges {
            debug!(
                "Propagating {}.{} -> {}.{} ({} samples)",
                self.nodes[id.0].name,
                port,
                self.nodes[edge.target.0].name,
                edge.input,
                output.sample_count()
            );
            self.run(edge.target, Some((edge.input.as_str(), output)))?;
        }
        Ok(())
    }

    /// Disposes one node. Repeated calls are no-ops.
    pub fn dispose(&mut self, id: NodeId) -> PipelineResult<()> {
        let entry = self.entry_mut(id)?;
        if entry.state == NodeState::Disposed {
            debug!("Node '{}' already disposed", entry.name);
            return Ok(());
        }
        entry.node.dispose()?;
        entry.ports.clear();
        entry.state = NodeState::Disposed;
        info!("Disposed node '{}'", entry.name);
        Ok(())
    }

    /// Disposes every node reachable from `id`, children first, then `id`.
    pub fn dispose_all(&mut self, id: NodeId) -> PipelineResult<()> {
        let children: Vec<NodeId> = self.entry(id)?.edges.iter().map(|e| e.target).collect();
        for child in children {
            self.dispose_all(child)?;
        }
        self.dispose(id)
    }

    /// Disposes the whole graph: each generator's subtree, then any node left over.
    pub fn dispose_graph(&mut self) -> PipelineResult<()> {
        for id in self.generators() {
            self.dispose_all(id)?;
        }
        for index in 0..self.nodes.len() {
            self.dispose(NodeId(index))?;
        }
        Ok(())
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&PipelineNode> {
        self.entry(id)
    }

    pub fn name(&self, id: NodeId) -> PipelineResult<&str> {
        Ok(&self.entry(id)?.name)
    }

    pub fn kind(&self, id: NodeId) -> PipelineResult<&str> {
        Ok(&self.entry(id)?.kind)
    }

    pub fn state(&self, id: NodeId) -> PipelineResult<NodeState> {
        Ok(self.entry(id)?.state)
    }

    pub fn input_buffer(&self, id: NodeId, port: &str) -> PipelineResult<&FrameworkData> {
        self.entry(id)?.ports.input(port)
    }

    pub fn output_buffer(&self, id: NodeId, port: &str) -> PipelineResult<&FrameworkData> {
        self.entry(id)?.ports.output(port)
    }

    /// Children bound on `port`, in registration order.
    pub fn children(&self, id: NodeId, port: &str) -> PipelineResult<&[Edge]> {
        let entry = self.entry(id)?;
        if !entry.ports.has_output(port) {
            return Err(PipelineError::invalid_value(
                format!("output port '{}.{}'", entry.name, port),
                "unknown port",
            ));
        }
        Ok(entry.edges.edges(port))
    }

    /// Generator node ids, in insertion order.
    pub fn generators(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.node.is_generator())
            .map(|(index, _)| NodeId(index))
            .collect()
    }

    /// Node ids ordered so every parent precedes its children.
    pub fn topological_order(&self) -> PipelineResult<Vec<NodeId>> {
        toposort(&self.topology, None).map_err(|cycle| {
            let name = self.nodes[cycle.node_id().0].name.clone();
            PipelineError::CycleDetected {
                from: name.clone(),
                to: name,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn entry(&self, id: NodeId) -> PipelineResult<&PipelineNode> {
        self.nodes.get(id.0).ok_or_else(|| PipelineError::UnknownNode {
            name: id.to_string(),
        })
    }

    fn entry_mut(&mut self, id: NodeId) -> PipelineResult<&mut PipelineNode> {
        self.nodes.get_mut(id.0).ok_or_else(|| PipelineError::UnknownNode {
            name: id.to_string(),
        })
    }
}
