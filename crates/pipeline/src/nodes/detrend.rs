//! Removes a constant offset or a least-squares line from each channel.

use serde_json::json;

use super::numeric_channel;
use crate::config::NodeConfig;
use crate::data::{FrameworkData, DEFAULT_CHANNEL};
use crate::error::{PipelineError, PipelineResult};
use crate::node::{Node, NodePorts};
use crate::registry::NodeFactory;

pub const DETREND_MODULE: &str = "node.processor.detrend";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetrendType {
    None,
    #[default]
    Constant,
    Linear,
}

impl DetrendType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "constant" => Some(Self::Constant),
            "linear" => Some(Self::Linear),
            _ => None,
        }
    }

    /// Detrended copy of `samples`.
    pub fn apply(self, samples: &[f64]) -> Vec<f64> {
        if samples.is_empty() {
            return Vec::new();
        }
        let n = samples.len() as f64;
        match self {
            Self::None => samples.to_vec(),
            Self::Constant => {
                let mean = samples.iter().sum::<f64>() / n;
                samples.iter().map(|x| x - mean).collect()
            }
            Self::Linear => {
                let mean_x = (n - 1.0) / 2.0;
                let mean_y = samples.iter().sum::<f64>() / n;
                let (mut sxy, mut sxx) = (0.0, 0.0);
                for (i, y) in samples.iter().enumerate() {
                    let dx = i as f64 - mean_x;
                    sxy += dx * (y - mean_y);
                    sxx += dx * dx;
                }
                let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
                samples
                    .iter()
                    .enumerate()
                    .map(|(i, y)| y - (mean_y + slope * (i as f64 - mean_x)))
                    .collect()
            }
        }
    }
}

#[derive(Default)]
pub struct DetrendFactory;

impl NodeFactory for DetrendFactory {
    fn kind(&self) -> &'static str {
        "detrend"
    }

    fn create(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>> {
        Ok(Box::new(Detrend::from_config(config)?))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "detrend_type": {
                    "type": "string",
                    "enum": ["none", "constant", "linear"],
                    "default": "constant"
                }
            }
        })
    }
}

/// Processor that detrends each incoming block channel by channel.
#[derive(Debug, Default)]
pub struct Detrend {
    detrend_type: DetrendType,
}

impl Detrend {
    pub fn new(detrend_type: DetrendType) -> Self {
        Self { detrend_type }
    }

    pub fn from_config(config: &NodeConfig) -> PipelineResult<Self> {
        let detrend_type = match config.optional_string(DETREND_MODULE, "detrend_type")? {
            Some(value) => DetrendType::parse(&value).ok_or_else(|| {
                PipelineError::invalid_parameter(DETREND_MODULE, "detrend_type", "unknown_detrend_type")
            })?,
            None => DetrendType::default(),
        };
        Ok(Self::new(detrend_type))
    }

    pub fn detrend_type(&self) -> DetrendType {
        self.detrend_type
    }
}

impl Node for Detrend {
    fn inputs(&self) -> &[&'static str] {
        &[DEFAULT_CHANNEL]
    }

    fn outputs(&self) -> &[&'static str] {
        &[DEFAULT_CHANNEL]
    }

    fn process(&mut self, _input: Option<&str>, ports: &mut NodePorts) -> PipelineResult<()> {
        let block = ports.take_input(DEFAULT_CHANNEL)?;
        let mut detrended = FrameworkData::with_channels(block.sampling_frequency(), block.channels())?;
        for channel in block.channels() {
            let samples = numeric_channel(&block, channel)?;
            detrended.append(Some(channel.as_str()), self.detrend_type.apply(&samples));
        }
        ports.replace_output(DEFAULT_CHANNEL, detrended)
    }

    fn should_propagate(&self, ports: &NodePorts) -> bool {
        ports
            .output(DEFAULT_CHANNEL)
            .is_ok_and(FrameworkData::has_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_constant_removes_mean() {
        assert_close(&DetrendType::Constant.apply(&[1.0, 2.0, 3.0]), &[-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_linear_removes_ramp() {
        let ramp: Vec<f64> = (0..8).map(|i| 3.0 + 0.5 * i as f64).collect();
        assert_close(&DetrendType::Linear.apply(&ramp), &[0.0; 8]);
        assert_close(&DetrendType::Linear.apply(&[4.0]), &[0.0]);
    }

    #[test]
    fn test_none_and_empty() {
        assert_close(&DetrendType::None.apply(&[1.0, 5.0]), &[1.0, 5.0]);
        assert!(DetrendType::Linear.apply(&[]).is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig::new("detrend", "d", json!({})).unwrap();
        assert_eq!(Detrend::from_config(&config).unwrap().detrend_type(), DetrendType::Constant);

        let config = NodeConfig::new("detrend", "d", json!({ "detrend_type": "linear" })).unwrap();
        assert_eq!(Detrend::from_config(&config).unwrap().detrend_type(), DetrendType::Linear);

        let config = NodeConfig::new("detrend", "d", json!({ "detrend_type": "cubic" })).unwrap();
        let err = Detrend::from_config(&config).unwrap_err();
        assert_eq!(err.cause(), Some("unknown_detrend_type"));
    }

    #[test]
    fn test_process_replaces_output() {
        let mut node = Detrend::default();
        let mut ports = NodePorts::for_node(&node);
        assert!(!node.should_propagate(&ports));

        let mut block = FrameworkData::with_sampling_frequency(100.0).unwrap();
        block.append(Some("ch1"), [2.0, 4.0]);
        ports.input_mut("main").unwrap().extend(&block);
        node.process(Some("main"), &mut ports).unwrap();

        let out = ports.output("main").unwrap();
        assert_eq!(out.sampling_frequency(), Some(100.0));
        assert_eq!(out.channel_f64("ch1").unwrap(), vec![-1.0, 1.0]);
        assert!(!ports.input("main").unwrap().has_data());
        assert!(node.should_propagate(&ports));

        // second block replaces rather than accumulates
        ports.input_mut("main").unwrap().extend(&block);
        node.process(Some("main"), &mut ports).unwrap();
        assert_eq!(ports.output("main").unwrap().sample_count(), 2);
    }

    #[test]
    fn test_text_samples_rejected() {
        let mut node = Detrend::default();
        let mut ports = NodePorts::for_node(&node);
        ports.input_mut("main").unwrap().append(None, ["abc"]);
        let err = node.process(Some("main"), &mut ports).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidValue { .. }));
    }
}
