//! Node construction parameters and the pipeline configuration document.
//!
//! Node records are validated eagerly: every required field is checked when the
//! record is parsed, and kind-specific fields are checked by the node factory
//! through the typed accessors below. Nothing is validated during a run pass.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// Module name reported by base-record validation errors.
pub const NODE_MODULE: &str = "node";

/// Location of the process-wide configuration document.
pub const CONFIG_PATH: &str = "config/configuration.json";

/// Child binding declared under a node's `outputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeTarget {
    /// Name of the child node.
    pub node: String,
    /// Input port on the child.
    pub input: String,
}

/// Validated node construction record
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node kind identifier used to select a factory
    pub kind: String,
    /// Unique node name within the graph
    pub name: String,
    /// Buffer behaviour options, interpreted by the node kind
    pub buffer_options: Map<String, Value>,
    /// Output port -> ordered child bindings
    pub outputs: Vec<(String, Vec<EdgeTarget>)>,
    params: Map<String, Value>,
    base_dir: Option<PathBuf>,
}

impl NodeConfig {
    /// Validates the base fields shared by every node kind.
    pub fn from_value(value: &Value) -> PipelineResult<Self> {
        let params = value
            .as_object()
            .ok_or_else(|| PipelineError::invalid_parameter(NODE_MODULE, "node", "must_be_object"))?;

        let kind = required(params, NODE_MODULE, "kind")?
            .as_str()
            .ok_or_else(|| PipelineError::invalid_parameter(NODE_MODULE, "kind", "must_be_string"))?
            .to_string();

        let name = required(params, NODE_MODULE, "name")?
            .as_str()
            .ok_or_else(|| PipelineError::invalid_parameter(NODE_MODULE, "name", "must_be_string"))?
            .to_string();
        if name.is_empty() {
            return Err(PipelineError::invalid_parameter(NODE_MODULE, "name", "is_empty"));
        }

        let buffer_options = required(params, NODE_MODULE, "buffer_options")?
            .as_object()
            .ok_or_else(|| {
                PipelineError::invalid_parameter(NODE_MODULE, "buffer_options", "must_be_object")
            })?
            .clone();

        let outputs = parse_outputs(required(params, NODE_MODULE, "outputs")?)?;

        Ok(Self {
            kind,
            name,
            buffer_options,
            outputs,
            params: params.clone(),
            base_dir: None,
        })
    }

    /// Builds a record from parts; mainly for tests and programmatic graphs.
    pub fn new(kind: &str, name: &str, params: Value) -> PipelineResult<Self> {
        let mut record = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(PipelineError::invalid_parameter(NODE_MODULE, "node", "must_be_object")),
        };
        record.insert("kind".into(), Value::from(kind));
        record.insert("name".into(), Value::from(name));
        record
            .entry("buffer_options")
            .or_insert_with(|| Value::Object(Map::new()));
        record
            .entry("outputs")
            .or_insert_with(|| Value::Object(Map::new()));
        Self::from_value(&Value::Object(record))
    }

    /// Directory that relative paths in this record are resolved against.
    pub fn with_base_dir(mut self, dir: Option<&Path>) -> Self {
        self.base_dir = dir.map(Path::to_path_buf);
        self
    }

    /// Joins a relative `path` onto the record's base directory, if any.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Raw access to any field of the record.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// A required number strictly greater than zero.
    pub fn require_positive_number(&self, module: &str, key: &str) -> PipelineResult<f64> {
        let value = required(&self.params, module, key)?;
        positive_number(module, key, value)
    }

    /// An optional number strictly greater than zero.
    pub fn optional_positive_number(&self, module: &str, key: &str) -> PipelineResult<Option<f64>> {
        self.params
            .get(key)
            .map(|value| positive_number(module, key, value))
            .transpose()
    }

    pub fn require_string(&self, module: &str, key: &str) -> PipelineResult<String> {
        let value = required(&self.params, module, key)?;
        string(module, key, value)
    }

    pub fn optional_string(&self, module: &str, key: &str) -> PipelineResult<Option<String>> {
        self.params
            .get(key)
            .map(|value| string(module, key, value))
            .transpose()
    }

    /// An optional, non-empty list of strings.
    pub fn optional_string_list(&self, module: &str, key: &str) -> PipelineResult<Option<Vec<String>>> {
        let Some(value) = self.params.get(key) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| PipelineError::invalid_parameter(module, key, "must_be_list"))?;
        if items.is_empty() {
            return Err(PipelineError::invalid_parameter(module, key, "is_empty"));
        }
        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    PipelineError::invalid_parameter(module, key, "must_contain_strings_only")
                })
            })
            .collect::<PipelineResult<Vec<_>>>()
            .map(Some)
    }
}

fn required<'a>(params: &'a Map<String, Value>, module: &str, key: &str) -> PipelineResult<&'a Value> {
    params
        .get(key)
        .ok_or_else(|| PipelineError::missing(module, key))
}

fn positive_number(module: &str, key: &str, value: &Value) -> PipelineResult<f64> {
    let number = value
        .as_f64()
        .ok_or_else(|| PipelineError::invalid_parameter(module, key, "must_be_number"))?;
    if number <= 0.0 || !number.is_finite() {
        return Err(PipelineError::invalid_parameter(module, key, "must_be_positive"));
    }
    Ok(number)
}

fn string(module: &str, key: &str, value: &Value) -> PipelineResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PipelineError::invalid_parameter(module, key, "must_be_string"))
}

fn parse_outputs(value: &Value) -> PipelineResult<Vec<(String, Vec<EdgeTarget>)>> {
    let ports = value
        .as_object()
        .ok_or_else(|| PipelineError::invalid_parameter(NODE_MODULE, "outputs", "must_be_object"))?;

    let mut outputs = Vec::with_capacity(ports.len());
    for (port, targets) in ports {
        let parameter = format!("outputs.{port}");
        let targets = targets
            .as_array()
            .ok_or_else(|| PipelineError::invalid_parameter(NODE_MODULE, &parameter, "must_be_list"))?;

        let mut edges = Vec::with_capacity(targets.len());
        for target in targets {
            let node = target.get("node").and_then(Value::as_str);
            let input = target.get("input").and_then(Value::as_str);
            match (node, input) {
                (Some(node), Some(input)) => edges.push(EdgeTarget {
                    node: node.to_string(),
                    input: input.to_string(),
                }),
                _ => {
                    return Err(PipelineError::invalid_parameter(
                        NODE_MODULE,
                        &parameter,
                        "must_contain_node_and_input",
                    ))
                }
            }
        }
        outputs.push((port.clone(), edges));
    }
    Ok(outputs)
}

/// The pipeline configuration document.
///
/// ```json
/// { "nodes": { "root": [ ...node records... ], "common": [ ... ] } }
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    document: Value,
    base_dir: Option<PathBuf>,
}

lazy_static! {
    static ref GLOBAL_CONFIGURATION: Mutex<Option<Arc<Configuration>>> = Mutex::new(None);
}

impl Configuration {
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let document: Value = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut configuration = Self::from_json(&contents)?;
        configuration.base_dir = path.parent().map(Path::to_path_buf);
        info!("Loaded configuration from {}", path.display());
        Ok(configuration)
    }

    fn from_document(document: Value) -> PipelineResult<Self> {
        let nodes = document
            .get("nodes")
            .ok_or_else(|| PipelineError::missing("configuration", "nodes"))?;
        for group in ["root", "common"] {
            match nodes.get(group) {
                None => return Err(PipelineError::missing("configuration", &format!("nodes.{group}"))),
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(PipelineError::invalid_parameter(
                        "configuration",
                        &format!("nodes.{group}"),
                        "must_be_list",
                    ))
                }
            }
        }
        Ok(Self {
            document,
            base_dir: None,
        })
    }

    /// Process-wide configuration, loaded from [`CONFIG_PATH`] on first use.
    pub fn global() -> PipelineResult<Arc<Configuration>> {
        let mut slot = GLOBAL_CONFIGURATION
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(configuration) = slot.as_ref() {
            return Ok(Arc::clone(configuration));
        }
        let configuration = Arc::new(Self::from_path(CONFIG_PATH)?);
        *slot = Some(Arc::clone(&configuration));
        Ok(configuration)
    }

    /// Drops the cached global configuration; the next `global()` reloads it.
    pub fn reset() {
        let mut slot = GLOBAL_CONFIGURATION
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    /// Directory of the loaded document; relative node paths resolve against it.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Generator nodes driven externally.
    pub fn root_nodes(&self) -> &[Value] {
        self.group("root")
    }

    /// Nodes reached only through edges.
    pub fn common_nodes(&self) -> &[Value] {
        self.group("common")
    }

    fn group(&self, name: &str) -> &[Value] {
        self.document["nodes"][name]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_record() -> Value {
        json!({
            "kind": "detrend",
            "name": "detrend1",
            "buffer_options": {},
            "outputs": {
                "main": [ { "node": "sink", "input": "main" } ]
            }
        })
    }

    #[test]
    fn test_relative_paths_resolve_against_document_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configuration.json");
        std::fs::write(&path, r#"{ "nodes": { "root": [], "common": [] } }"#).unwrap();

        let configuration = Configuration::from_path(&path).unwrap();
        assert_eq!(configuration.base_dir(), Some(dir.path()));

        let record = NodeConfig::from_value(&base_record())
            .unwrap()
            .with_base_dir(configuration.base_dir());
        assert_eq!(record.resolve_path("data/a.csv"), dir.path().join("data/a.csv"));
        assert_eq!(record.resolve_path("/abs/a.csv"), PathBuf::from("/abs/a.csv"));

        let detached = NodeConfig::from_value(&base_record()).unwrap();
        assert_eq!(detached.resolve_path("data/a.csv"), PathBuf::from("data/a.csv"));
        assert!(Configuration::from_json(r#"{ "nodes": { "root": [], "common": [] } }"#)
            .unwrap()
            .base_dir()
            .is_none());
    }

    #[test]
    fn test_base_record_parses() {
        let config = NodeConfig::from_value(&base_record()).unwrap();
        assert_eq!(config.kind, "detrend");
        assert_eq!(config.name, "detrend1");
        assert_eq!(
            config.outputs,
            vec![(
                "main".to_string(),
                vec![EdgeTarget {
                    node: "sink".into(),
                    input: "main".into()
                }]
            )]
        );
    }

    #[test]
    fn test_missing_required_field_is_named() {
        for field in ["kind", "name", "buffer_options", "outputs"] {
            let mut record = base_record();
            record.as_object_mut().unwrap().remove(field);
            let err = NodeConfig::from_value(&record).unwrap_err();
            assert!(
                matches!(err, PipelineError::MissingParameter { .. }),
                "{field}: {err}"
            );
            assert_eq!(err.parameter(), Some(field));
        }
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let mut record = base_record();
        record["name"] = json!(3);
        let err = NodeConfig::from_value(&record).unwrap_err();
        assert_eq!(err.cause(), Some("must_be_string"));

        let mut record = base_record();
        record["buffer_options"] = json!([]);
        let err = NodeConfig::from_value(&record).unwrap_err();
        assert_eq!(err.cause(), Some("must_be_object"));

        let mut record = base_record();
        record["outputs"] = json!({ "main": { "node": "sink" } });
        let err = NodeConfig::from_value(&record).unwrap_err();
        assert_eq!(err.parameter(), Some("outputs.main"));
        assert_eq!(err.cause(), Some("must_be_list"));
    }

    #[test]
    fn test_typed_accessors() {
        let config = NodeConfig::new(
            "csv_file",
            "reader",
            json!({
                "sampling_frequency": 250,
                "channel_column_names": ["a", 1],
                "label": "x"
            }),
        )
        .unwrap();

        assert_eq!(config.require_positive_number("m", "sampling_frequency").unwrap(), 250.0);
        assert_eq!(config.optional_string("m", "label").unwrap().as_deref(), Some("x"));
        assert_eq!(config.optional_string("m", "absent").unwrap(), None);
        assert_eq!(
            config.optional_string_list("m", "channel_column_names").unwrap_err().cause(),
            Some("must_contain_strings_only")
        );
        assert_eq!(
            config.require_string("m", "file_path").unwrap_err().parameter(),
            Some("file_path")
        );
    }

    #[test]
    fn test_configuration_groups() {
        let configuration = Configuration::from_json(
            r#"{ "nodes": { "root": [ { "name": "a" } ], "common": [] } }"#,
        )
        .unwrap();
        assert_eq!(configuration.root_nodes().len(), 1);
        assert!(configuration.common_nodes().is_empty());

        let err = Configuration::from_json(r#"{ "nodes": { "root": [] } }"#).unwrap_err();
        assert_eq!(err.parameter(), Some("nodes.common"));
    }

    #[test]
    fn test_global_configuration_is_cached_until_reset() {
        // test binaries run from the crate directory, which ships config/configuration.json
        Configuration::reset();
        let first = Configuration::global().unwrap();
        let second = Configuration::global().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.root_nodes().is_empty());

        Configuration::reset();
        let reloaded = Configuration::global().unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }
}
