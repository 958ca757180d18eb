use serde_json::json;
use tracing::info;

use crate::config::NodeConfig;
use crate::data::{FrameworkData, DEFAULT_CHANNEL};
use crate::error::PipelineResult;
use crate::node::{Node, NodePorts};
use crate::registry::NodeFactory;

#[derive(Default)]
pub struct LogSinkFactory;

impl NodeFactory for LogSinkFactory {
    fn kind(&self) -> &'static str {
        "log_sink"
    }

    fn create(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>> {
        Ok(Box::new(LogSink::new(&config.name)))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }
}

/// Terminal node that logs a summary of every block it receives.
#[derive(Debug)]
pub struct LogSink {
    name: String,
    blocks: usize,
    samples: usize,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blocks: 0,
            samples: 0,
        }
    }

    /// Blocks received so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn samples(&self) -> usize {
        self.samples
    }
}

impl Node for LogSink {
    fn inputs(&self) -> &[&'static str] {
        &[DEFAULT_CHANNEL]
    }

    fn outputs(&self) -> &[&'static str] {
        &[]
    }

    fn process(&mut self, _input: Option<&str>, ports: &mut NodePorts) -> PipelineResult<()> {
        let block: FrameworkData = ports.take_input(DEFAULT_CHANNEL)?;
        let count = block.sample_count();
        self.blocks += 1;
        self.samples += count;
        info!(
            sink = %self.name,
            channels = ?block.channels(),
            sampling_frequency = ?block.sampling_frequency(),
            samples = count,
            "Received block"
        );
        Ok(())
    }

    fn should_propagate(&self, _ports: &NodePorts) -> bool {
        false
    }
}
