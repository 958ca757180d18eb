//! Tabular file generator.
//!
//! Reads a whole CSV file on its first run and emits one numeric channel per
//! selected column on `main`, plus one value per row on `timestamp`.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::info;

use crate::config::NodeConfig;
use crate::data::{FrameworkData, Sample};
use crate::error::{PipelineError, PipelineResult};
use crate::node::{Node, NodePorts};
use crate::registry::NodeFactory;

pub const CSV_FILE_MODULE: &str = "node.generator.file.csv_file";

pub const OUTPUT_MAIN: &str = "main";
pub const OUTPUT_TIMESTAMP: &str = "timestamp";

/// A factory for creating `CsvFile` nodes.
#[derive(Default)]
pub struct CsvFileFactory;

impl NodeFactory for CsvFileFactory {
    fn kind(&self) -> &'static str {
        "csv_file"
    }

    fn create(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>> {
        Ok(Box::new(CsvFile::from_config(config)?))
    }

    fn parameter_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["sampling_frequency", "file_path"],
            "properties": {
                "sampling_frequency": {
                    "type": "number",
                    "description": "Sampling frequency of the recording in Hz",
                    "exclusiveMinimum": 0
                },
                "file_path": {
                    "type": "string",
                    "description": "Path to a .csv file with a header row"
                },
                "channel_column_names": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Columns to emit on 'main' (default: every column except the timestamp)"
                },
                "timestamp_column_name": {
                    "type": "string",
                    "description": "Column emitted on 'timestamp' (default: the row index)"
                }
            }
        })
    }
}

/// Generator node backed by a CSV file.
pub struct CsvFile {
    sampling_frequency: f64,
    file_path: PathBuf,
    channel_column_names: Option<Vec<String>>,
    timestamp_column_name: Option<String>,
    reader: Option<csv::Reader<File>>,
}

impl CsvFile {
    /// Validates the parameters and opens the file.
    pub fn from_config(config: &NodeConfig) -> PipelineResult<Self> {
        for key in ["sampling_frequency", "file_path"] {
            if !config.contains(key) {
                return Err(PipelineError::missing(CSV_FILE_MODULE, key));
            }
        }
        let sampling_frequency = config.require_positive_number(CSV_FILE_MODULE, "sampling_frequency")?;
        let file_path = config.resolve_path(config.require_string(CSV_FILE_MODULE, "file_path")?);
        if file_path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
            return Err(PipelineError::invalid_parameter(
                CSV_FILE_MODULE,
                "file_path",
                "must_be_csv_file",
            ));
        }
        let timestamp_column_name = config.optional_string(CSV_FILE_MODULE, "timestamp_column_name")?;
        let channel_column_names = config.optional_string_list(CSV_FILE_MODULE, "channel_column_names")?;

        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&file_path)?;
        info!("{} opened", file_path.display());

        Ok(Self {
            sampling_frequency,
            file_path,
            channel_column_names,
            timestamp_column_name,
            reader: Some(reader),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Whether the file handle is still held.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Reads every remaining row and closes the file. `None` once closed.
    fn generate(&mut self) -> PipelineResult<Option<(FrameworkData, FrameworkData)>> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(None);
        };

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                PipelineError::invalid_value(
                    format!("{} column '{}'", self.file_path.display(), name),
                    "column not found in header",
                )
            })
        };

        let channels: Vec<String> = match &self.channel_column_names {
            Some(names) => names.clone(),
            None => headers
                .iter()
                .filter(|h| Some(*h) != self.timestamp_column_name.as_deref())
                .map(str::to_string)
                .collect(),
        };
        let channel_columns = channels
            .iter()
            .map(|name| column(name.as_str()))
            .collect::<PipelineResult<Vec<_>>>()?;
        let timestamp_column = self.timestamp_column_name.as_deref().map(column).transpose()?;

        let mut main = FrameworkData::with_channels(Some(self.sampling_frequency), channels.iter())?;
        let mut timestamp = FrameworkData::with_sampling_frequency(self.sampling_frequency)?;

        for (row_index, record) in reader.records().enumerate() {
            let record = record?;
            for (name, &index) in channels.iter().zip(&channel_columns) {
                let raw = record.get(index).unwrap_or_default();
                let value: f64 = raw.parse().map_err(|_| {
                    PipelineError::invalid_value(
                        format!("{} row {} column '{}'", self.file_path.display(), row_index, name),
                        format!("'{raw}' is not a number"),
                    )
                })?;
                main.append(Some(name.as_str()), [value]);
            }
            let row_timestamp = match timestamp_column {
                Some(index) => Sample::from(record.get(index).unwrap_or_default()),
                None => Sample::from(row_index),
            };
            timestamp.append(None, [row_timestamp]);
        }

        drop(reader);
        info!("{} closed", self.file_path.display());
        Ok(Some((main, timestamp)))
    }
}

impl Node for CsvFile {
    fn inputs(&self) -> &[&'static str] {
        &[]
    }

    fn outputs(&self) -> &[&'static str] {
        &[OUTPUT_MAIN, OUTPUT_TIMESTAMP]
    }

    fn process(&mut self, _input: Option<&str>, ports: &mut NodePorts) -> PipelineResult<()> {
        if let Some((main, timestamp)) = self.generate()? {
            ports.insert_output(OUTPUT_MAIN, &main)?;
            ports.insert_output(OUTPUT_TIMESTAMP, &timestamp)?;
        }
        Ok(())
    }

    fn should_propagate(&self, ports: &NodePorts) -> bool {
        ports
            .output(OUTPUT_TIMESTAMP)
            .is_ok_and(FrameworkData::has_data)
    }

    fn dispose(&mut self) -> PipelineResult<()> {
        if self.reader.take().is_some() {
            info!("{} closed", self.file_path.display());
        }
        Ok(())
    }
}
