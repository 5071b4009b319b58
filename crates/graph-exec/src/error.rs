//! Error taxonomy surfaced by the execution manager.
//!
//! Every stage of the pipeline either fully succeeds and updates its cache or fails with one
//! of these errors and leaves its cache untouched. Nothing here is downgraded internally.

use thiserror::Error;

/// Malformed or unsupported argument structure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("dynamic axis {axis} of '{path}' is out of range for rank {rank}")]
    DynamicAxisOutOfRange {
        path: String,
        axis: usize,
        rank: usize,
    },
    #[error("argument '{path}' is nested deeper than {limit} levels")]
    TooDeep { path: String, limit: usize },
    #[error("mapping under '{path}' contains an empty key")]
    EmptyKey { path: String },
    #[error("{given} positional arguments given but the model declares {declared} parameters")]
    TooManyPositional { given: usize, declared: usize },
    #[error("unexpected keyword argument '{0}'")]
    UnexpectedKeyword(String),
    #[error("argument '{0}' was given both positionally and by keyword")]
    DuplicateArgument(String),
    #[error("flattened input name '{0}' is produced by more than one argument")]
    DuplicateInputName(String),
}

/// The external model exporter failed; carries the exporter's diagnostic text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("there was an error while exporting the model: {message}")]
pub struct ModelExportError {
    pub message: String,
}

/// The external graph compiler failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("graph compilation failed: {message}")]
pub struct GraphCompilationError {
    pub message: String,
}

/// The execution engine could not construct an agent for the compiled graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to create the execution agent: {message}")]
pub struct AgentBuildError {
    pub message: String,
}

/// Neither the model nor any tensor argument names a device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a device must be specified in the model or inputs")]
pub struct DeviceResolutionError;

/// The execution engine failed while running a ready agent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("execution failed: {message}")]
pub struct ExecutionError {
    pub message: String,
}

/// Configuration rejected when the manager is created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    ModelExport(#[from] ModelExportError),
    #[error(transparent)]
    GraphCompilation(#[from] GraphCompilationError),
    #[error(transparent)]
    AgentBuild(#[from] AgentBuildError),
    #[error(transparent)]
    DeviceResolution(#[from] DeviceResolutionError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Renders a collaborator error with its full context chain.
pub(crate) fn diagnostic(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
