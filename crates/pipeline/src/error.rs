//! Error types for the pipeline system

use thiserror::Error;

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required configuration field is absent.
    #[error("{module}: missing parameter '{parameter}'")]
    MissingParameter { module: String, parameter: String },

    /// A configuration field is present but has the wrong type, shape or domain.
    #[error("{module}: invalid value for parameter '{parameter}' ({cause})")]
    InvalidParameterValue {
        module: String,
        parameter: String,
        cause: String,
    },

    /// Caller misuse, such as an unknown port name or a non-scalar sample.
    #[error("invalid value for {context}: {message}")]
    InvalidValue { context: String, message: String },

    #[error("Node '{name}' has been disposed")]
    NodeDisposed { name: String },

    #[error("Node kind not registered: {kind}")]
    UnknownNodeKind { kind: String },

    #[error("Node not found: {name}")]
    UnknownNode { name: String },

    #[error("Edge {from} -> {to} would create a cycle in the pipeline graph")]
    CycleDetected { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn missing(module: &str, parameter: &str) -> Self {
        PipelineError::MissingParameter {
            module: module.to_string(),
            parameter: parameter.to_string(),
        }
    }

    pub fn invalid_parameter(module: &str, parameter: &str, cause: &str) -> Self {
        PipelineError::InvalidParameterValue {
            module: module.to_string(),
            parameter: parameter.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn invalid_value(context: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidValue {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Returns the machine-readable cause code of an `InvalidParameterValue`.
    pub fn cause(&self) -> Option<&str> {
        match self {
            PipelineError::InvalidParameterValue { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Returns the parameter named by a validation error, if any.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            PipelineError::MissingParameter { parameter, .. }
            | PipelineError::InvalidParameterValue { parameter, .. } => Some(parameter),
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
