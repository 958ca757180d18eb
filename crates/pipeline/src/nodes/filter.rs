use std::collections::HashMap;

use biquad::{Biquad, Coefficients, DirectForm2Transposed as DF2T, ToHertz, Type, Q_BUTTERWORTH_F64};
use serde_json::json;
use tracing::debug;

use super::numeric_channel;
use crate::config::NodeConfig;
use crate::data::{FrameworkData, DEFAULT_CHANNEL};
use crate::error::{PipelineError, PipelineResult};
use crate::node::{Node, NodePorts};
use crate::registry::NodeFactory;

pub const FILTER_MODULE: &str = "node.processor.filter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    Notch,
}

impl FilterType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "lowpass" => Some(Self::LowPass),
            "highpass" => Some(Self::HighPass),
            "notch" => Some(Self::Notch),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct FilterFactory;

impl NodeFactory for FilterFactory {
    fn kind(&self) -> &'static str {
        "filter"
    }

    fn create(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>> {
        Ok(Box::new(Filter::from_config(config)?))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["filter_type", "cutoff_hz"],
            "properties": {
                "filter_type": { "type": "string", "enum": ["lowpass", "highpass", "notch"] },
                "cutoff_hz": { "type": "number", "exclusiveMinimum": 0 },
                "q": { "type": "number", "exclusiveMinimum": 0, "default": Q_BUTTERWORTH_F64 }
            }
        })
    }
}

/// Single-section IIR filter applied to every channel of the incoming
/// block. Filter state carries over between blocks per channel.
pub struct Filter {
    filter_type: FilterType,
    cutoff_hz: f64,
    q: f64,
    fs_last: Option<f64>,
    chains: HashMap<String, DF2T<f64>>,
}

impl Filter {
    pub fn new(filter_type: FilterType, cutoff_hz: f64, q: f64) -> Self {
        Self {
            filter_type,
            cutoff_hz,
            q,
            fs_last: None,
            chains: HashMap::new(),
        }
    }

    pub fn from_config(config: &NodeConfig) -> PipelineResult<Self> {
        let name = config.require_string(FILTER_MODULE, "filter_type")?;
        let filter_type = FilterType::parse(&name).ok_or_else(|| {
            PipelineError::invalid_parameter(FILTER_MODULE, "filter_type", "unknown_filter_type")
        })?;
        let cutoff_hz = config.require_positive_number(FILTER_MODULE, "cutoff_hz")?;
        let q = config
            .optional_positive_number(FILTER_MODULE, "q")?
            .unwrap_or(Q_BUTTERWORTH_F64);
        Ok(Self::new(filter_type, cutoff_hz, q))
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    fn rebuild_if_needed(&mut self, fs_hz: f64) -> PipelineResult<Coefficients<f64>> {
        let nyq = fs_hz * 0.5;
        if self.cutoff_hz >= nyq {
            return Err(PipelineError::invalid_value(
                "filter cutoff_hz",
                format!("{} Hz is not below Nyquist ({} Hz)", self.cutoff_hz, nyq),
            ));
        }
        let filter = match self.filter_type {
            FilterType::LowPass => Type::LowPass,
            FilterType::HighPass => Type::HighPass,
            FilterType::Notch => Type::Notch,
        };
        let coeffs = Coefficients::<f64>::from_params(
            filter,
            fs_hz.hz(),
            self.cutoff_hz.hz(),
            self.q,
        )
        .map_err(|e| PipelineError::invalid_value("filter coefficients", format!("{:?}", e)))?;

        if self.fs_last != Some(fs_hz) {
            debug!("Rebuilding {:?} filter for {} Hz", self.filter_type, fs_hz);
            self.chains.clear();
            self.fs_last = Some(fs_hz);
        }
        Ok(coeffs)
    }
}

impl Node for Filter {
    fn inputs(&self) -> &[&'static str] {
        &[DEFAULT_CHANNEL]
    }

    fn outputs(&self) -> &[&'static str] {
        &[DEFAULT_CHANNEL]
    }

    fn process(&mut self, _input: Option<&str>, ports: &mut NodePorts) -> PipelineResult<()> {
        let block = ports.take_input(DEFAULT_CHANNEL)?;
        let fs = block.sampling_frequency().ok_or_else(|| {
            PipelineError::invalid_value("filter input", "sampling frequency is required")
        })?;
        let coeffs = self.rebuild_if_needed(fs)?;

        let mut filtered = FrameworkData::with_channels(Some(fs), block.channels())?;
        for channel in block.channels() {
            let samples = numeric_channel(&block, channel)?;
            let chain = self
                .chains
                .entry(channel.clone())
                .or_insert_with(|| DF2T::<f64>::new(coeffs));
            filtered.append(Some(channel.as_str()), samples.into_iter().map(|x| chain.run(x)));
        }
        ports.replace_output(DEFAULT_CHANNEL, filtered)
    }

    fn should_propagate(&self, ports: &NodePorts) -> bool {
        ports
            .output(DEFAULT_CHANNEL)
            .is_ok_and(FrameworkData::has_data)
    }

    fn dispose(&mut self) -> PipelineResult<()> {
        self.chains.clear();
        self.fs_last = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(fs: Option<f64>, samples: &[f64]) -> FrameworkData {
        let mut data = FrameworkData::new();
        if let Some(fs) = fs {
            data = FrameworkData::with_sampling_frequency(fs).unwrap();
        }
        data.append(Some("ch1"), samples.iter().copied());
        data
    }

    fn run(node: &mut Filter, ports: &mut NodePorts, data: &FrameworkData) -> PipelineResult<Vec<f64>> {
        ports.input_mut("main")?.extend(data);
        node.process(Some("main"), ports)?;
        Ok(ports.output("main")?.channel_f64("ch1").unwrap_or_default())
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut node = Filter::new(FilterType::LowPass, 10.0, Q_BUTTERWORTH_F64);
        let mut ports = NodePorts::for_node(&node);
        let mut last = 0.0;
        for _ in 0..20 {
            last = *run(&mut node, &mut ports, &block(Some(250.0), &[1.0; 50]))
                .unwrap()
                .last()
                .unwrap();
        }
        assert!((last - 1.0).abs() < 1e-3, "settled at {last}");
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut node = Filter::new(FilterType::HighPass, 1.0, Q_BUTTERWORTH_F64);
        let mut ports = NodePorts::for_node(&node);
        let out = run(&mut node, &mut ports, &block(Some(250.0), &[1.0; 2000])).unwrap();
        assert_eq!(out.len(), 2000);
        assert!(out.last().unwrap().abs() < 1e-3);
        assert!(node.should_propagate(&ports));
    }

    #[test]
    fn test_requires_sampling_frequency() {
        let mut node = Filter::new(FilterType::Notch, 50.0, 30.0);
        let mut ports = NodePorts::for_node(&node);
        let err = run(&mut node, &mut ports, &block(None, &[1.0])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidValue { .. }));
    }

    #[test]
    fn test_cutoff_above_nyquist() {
        let mut node = Filter::new(FilterType::LowPass, 200.0, Q_BUTTERWORTH_F64);
        let mut ports = NodePorts::for_node(&node);
        let err = run(&mut node, &mut ports, &block(Some(250.0), &[1.0])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig::new("filter", "f", json!({ "filter_type": "notch", "cutoff_hz": 50, "q": 30 })).unwrap();
        assert_eq!(Filter::from_config(&config).map(|f| f.filter_type()).ok(), Some(FilterType::Notch));

        let cases = [
            (json!({ "cutoff_hz": 50 }), None),
            (json!({ "filter_type": "bandstop", "cutoff_hz": 50 }), Some("unknown_filter_type")),
            (json!({ "filter_type": "lowpass", "cutoff_hz": -1 }), Some("must_be_positive")),
            (json!({ "filter_type": "lowpass", "cutoff_hz": 5, "q": "wide" }), Some("must_be_number")),
        ];
        for (params, cause) in cases {
            let config = NodeConfig::new("filter", "f", params).unwrap();
            let err = Filter::from_config(&config).err().unwrap();
            assert_eq!(err.cause(), cause);
        }
    }
}
