//! Core node trait and per-port buffers

use std::fmt;

use crate::data::FrameworkData;
use crate::error::{PipelineError, PipelineResult};

/// Capability interface every node kind implements.
///
/// The engine owns the port buffers and hands them to the node on each call;
/// a node only owns its kind-specific state and any external resources.
pub trait Node: Send {
    /// Input port names, in declaration order. Empty for generators.
    fn inputs(&self) -> &[&'static str];

    /// Output port names, in declaration order.
    fn outputs(&self) -> &[&'static str];

    /// Whether the node is a source that runs without input data.
    fn is_generator(&self) -> bool {
        self.inputs().is_empty()
    }

    /// Local processing step. `input` names the port that just received data,
    /// or `None` when a generator is driven externally.
    fn process(&mut self, input: Option<&str>, ports: &mut NodePorts) -> PipelineResult<()>;

    /// Gating predicate, re-evaluated after every `process` call.
    fn should_propagate(&self, ports: &NodePorts) -> bool;

    /// Releases owned resources. Must be safe to call more than once.
    fn dispose(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Node runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Constructed,
    Running,
    /// Terminal.
    Disposed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Constructed => "constructed",
            NodeState::Running => "running",
            NodeState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// One buffer per declared port, kept in declaration order.
#[derive(Debug, Clone, Default)]
pub struct NodePorts {
    inputs: Vec<(&'static str, FrameworkData)>,
    outputs: Vec<(&'static str, FrameworkData)>,
}

impl NodePorts {
    /// Allocates an empty buffer for each declared port.
    pub fn new(inputs: &[&'static str], outputs: &[&'static str]) -> Self {
        Self {
            inputs: inputs.iter().map(|&p| (p, FrameworkData::new())).collect(),
            outputs: outputs.iter().map(|&p| (p, FrameworkData::new())).collect(),
        }
    }

    /// Allocates buffers for the ports `node` declares.
    pub fn for_node(node: &dyn Node) -> Self {
        Self::new(node.inputs(), node.outputs())
    }

    pub fn input_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inputs.iter().map(|(name, _)| *name)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outputs.iter().map(|(name, _)| *name)
    }

    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|(name, _)| *name == port)
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|(name, _)| *name == port)
    }

    pub fn input(&self, port: &str) -> PipelineResult<&FrameworkData> {
        find(&self.inputs, port).ok_or_else(|| unknown_port("input", port))
    }

    pub fn input_mut(&mut self, port: &str) -> PipelineResult<&mut FrameworkData> {
        find_mut(&mut self.inputs, port).ok_or_else(|| unknown_port("input", port))
    }

    /// Moves the accumulated input out, leaving an empty buffer behind.
    pub fn take_input(&mut self, port: &str) -> PipelineResult<FrameworkData> {
        self.input_mut(port).map(std::mem::take)
    }

    pub fn output(&self, port: &str) -> PipelineResult<&FrameworkData> {
        find(&self.outputs, port).ok_or_else(|| unknown_port("output", port))
    }

    pub fn output_mut(&mut self, port: &str) -> PipelineResult<&mut FrameworkData> {
        find_mut(&mut self.outputs, port).ok_or_else(|| unknown_port("output", port))
    }

    /// Appends `data` to the end of an output buffer.
    pub fn insert_output(&mut self, port: &str, data: &FrameworkData) -> PipelineResult<()> {
        self.output_mut(port)?.extend(data);
        Ok(())
    }

    /// Replaces an output buffer, for nodes that only forward fresh data.
    pub fn replace_output(&mut self, port: &str, data: FrameworkData) -> PipelineResult<()> {
        *self.output_mut(port)? = data;
        Ok(())
    }

    /// Resets every buffer to an empty instance.
    pub fn clear(&mut self) {
        for (_, buffer) in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            *buffer = FrameworkData::new();
        }
    }

    pub(crate) fn take_output(&mut self, port: &str) -> PipelineResult<FrameworkData> {
        self.output_mut(port).map(std::mem::take)
    }
}

fn find<'a>(ports: &'a [(&'static str, FrameworkData)], port: &str) -> Option<&'a FrameworkData> {
    ports.iter().find(|(name, _)| *name == port).map(|(_, b)| b)
}

fn find_mut<'a>(
    ports: &'a mut [(&'static str, FrameworkData)],
    port: &str,
) -> Option<&'a mut FrameworkData> {
    ports.iter_mut().find(|(name, _)| *name == port).map(|(_, b)| b)
}

fn unknown_port(direction: &str, port: &str) -> PipelineError {
    PipelineError::invalid_value(format!("{direction} port '{port}'"), "unknown port")
}
