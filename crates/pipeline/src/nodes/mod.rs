//! Built-in node kinds

pub mod csv_file;
pub mod detrend;
pub mod filter;
pub mod log_sink;

pub use csv_file::*;
pub use detrend::*;
pub use filter::*;
pub use log_sink::*;

use crate::data::FrameworkData;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::NodeRegistry;

/// Register all built-in node kinds with the registry
pub fn register_builtin_nodes(registry: &mut NodeRegistry) {
    registry.register(CsvFileFactory);
    registry.register(DetrendFactory);
    registry.register(FilterFactory);
    registry.register(LogSinkFactory);
}

/// Numeric samples of one channel; text samples are an error.
pub(crate) fn numeric_channel(data: &FrameworkData, channel: &str) -> PipelineResult<Vec<f64>> {
    data.channel(channel)
        .unwrap_or_default()
        .iter()
        .map(|sample| {
            sample.as_f64().ok_or_else(|| {
                PipelineError::invalid_value(
                    format!("channel '{channel}'"),
                    format!("expected a numeric sample, got '{sample}'"),
                )
            })
        })
        .collect()
}
