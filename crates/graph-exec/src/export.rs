//! Export cache: owns the exported intermediate representation and decides when to rebuild it.
//!
//! The exported representation is replaced wholesale on every successful export and never
//! edited in place. A failed export leaves the previous representation (and the schema it was
//! exported for) untouched, so the next call re-evaluates against the pre-failure state.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{LogLevel, ManagerConfig, SaveModelsConfig};
use crate::device::Device;
use crate::error::{diagnostic, ModelExportError};
use crate::hashing::fnv1a_hash;
use crate::io::{resolve_outputs, DynamicAxes, InputInfo, NamedInput, OutputInfo};
use crate::random::{RandomStateGuard, RandomStateSource};
use crate::schema::InputSchema;
use crate::tensor::CallArgs;

/// Exporter arguments fixed by the cache; extra options may not override them.
pub const REQUIRED_EXPORT_OPTIONS: [&str; 9] = [
    "input_names",
    "output_names",
    "opset_version",
    "do_constant_folding",
    "training",
    "dynamic_axes",
    "verbose",
    "export_params",
    "keep_initializers_as_inputs",
];

/// Whether the model is exported and compiled for training or for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Training,
    Inference,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Training => "training",
            ExecutionMode::Inference => "inference",
        }
    }

    pub fn is_training(self) -> bool {
        matches!(self, ExecutionMode::Training)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    pub requires_grad: bool,
}

/// The user model whose calls are being accelerated.
pub trait HostModel {
    /// Names of the forward parameters, in declaration order.
    fn forward_parameter_names(&self) -> Vec<String>;

    /// Whether keyword arguments outside the declared parameters are accepted.
    fn accepts_var_keyword(&self) -> bool {
        false
    }

    fn named_parameters(&self) -> Vec<ParameterInfo>;

    /// Persistent non-parameter tensors that may also feed graph inputs.
    fn named_buffers(&self) -> Vec<NamedInput> {
        Vec::new()
    }

    fn device(&self) -> Option<Device>;

    /// Output analysis for the given call: names and ranks of every model output.
    fn describe_outputs(&self, call: &CallArgs) -> anyhow::Result<Vec<OutputInfo>>;
}

/// Exporter classification of an input feeding a label or embedding-index consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparsityCandidate {
    Label { input: String, ignore_index: i64 },
    Embedding { input: String, padding_idx: i64 },
}

impl SparsityCandidate {
    pub fn input(&self) -> &str {
        match self {
            SparsityCandidate::Label { input, .. } | SparsityCandidate::Embedding { input, .. } => {
                input
            }
        }
    }
}

/// Arguments of one exporter invocation.
pub struct ExportRequest<'a> {
    pub sample_inputs: &'a [NamedInput],
    pub input_names: &'a [String],
    pub output_names: &'a [String],
    pub dynamic_axes: &'a DynamicAxes,
    pub mode: ExecutionMode,
    pub opset_version: u32,
    pub verbose: bool,
    pub extra_options: &'a BTreeMap<String, String>,
}

/// What the exporter hands back: an opaque serialized graph plus its declared inputs.
#[derive(Debug, Clone, Default)]
pub struct ExportOutput {
    pub model: Vec<u8>,
    /// Declared graph inputs; initializers are kept as inputs and appear here too.
    pub graph_inputs: Vec<String>,
    pub sparsity_candidates: Vec<SparsityCandidate>,
    /// Warnings the exporter emitted while tracing the model.
    pub warnings: Vec<String>,
}

/// External translator from host model to intermediate representation.
pub trait ModelExporter {
    fn export(
        &self,
        model: &dyn HostModel,
        request: &ExportRequest<'_>,
    ) -> anyhow::Result<ExportOutput>;

    /// Optional symbolic shape inference over the serialized graph.
    fn infer_shapes(&self, model: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        Ok(model)
    }
}

/// Immutable result of one successful export.
#[derive(Debug)]
pub struct ExportedRepresentation {
    pub generation: u64,
    pub model: Arc<[u8]>,
    pub graph_inputs: Vec<String>,
    pub input_info: InputInfo,
    pub output_names: Vec<String>,
    pub output_schema: Vec<OutputInfo>,
    /// Input and output dynamic axes merged.
    pub dynamic_axes: DynamicAxes,
    pub sparsity_candidates: Vec<SparsityCandidate>,
    pub warnings: Vec<String>,
    pub device: Device,
    pub mode: ExecutionMode,
    pub duration: Duration,
}

impl ExportedRepresentation {
    pub fn schema(&self) -> &InputSchema {
        &self.input_info.schema
    }

    /// Content hash of the serialized model, stable across processes.
    pub fn model_hash(&self) -> u64 {
        fnv1a_hash(&self.model)
    }
}

/// Explicit "the host model changed" flag, raised by collaborators and consumed by one export.
#[derive(Debug, Clone, Default)]
pub struct ChangeSignal {
    raised: Arc<AtomicBool>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clears the signal and returns whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }
}

/// Everything an export needs from the current call.
pub struct ExportContext<'a> {
    pub model: &'a dyn HostModel,
    pub exporter: &'a dyn ModelExporter,
    pub call: &'a CallArgs,
    pub inputs: &'a [NamedInput],
    pub schema: InputSchema,
    pub device: Device,
    pub mode: ExecutionMode,
    pub config: &'a ManagerConfig,
}

pub struct ExportCache {
    current: Option<Arc<ExportedRepresentation>>,
    generation: u64,
    random_sources: Vec<Arc<dyn RandomStateSource>>,
}

impl ExportCache {
    pub fn new(random_sources: Vec<Arc<dyn RandomStateSource>>) -> Self {
        ExportCache {
            current: None,
            generation: 0,
            random_sources,
        }
    }

    pub fn current(&self) -> Option<&Arc<ExportedRepresentation>> {
        self.current.as_ref()
    }

    pub fn last_schema(&self) -> Option<&InputSchema> {
        self.current.as_deref().map(ExportedRepresentation::schema)
    }

    /// True when nothing was exported yet, the schema differs, or a change was signalled.
    pub fn needs_export(&self, schema: &InputSchema, change_signal: bool) -> bool {
        match self.last_schema() {
            None => true,
            Some(last) => change_signal || last != schema,
        }
    }

    /// Runs the exporter and swaps in the new representation on success.
    pub fn export(
        &mut self,
        ctx: ExportContext<'_>,
    ) -> Result<Arc<ExportedRepresentation>, ModelExportError> {
        let _random_state = RandomStateGuard::capture(&self.random_sources);
        let start = Instant::now();

        let input_info = InputInfo::new(ctx.inputs, ctx.schema);
        let output_schema = ctx
            .model
            .describe_outputs(ctx.call)
            .context("output analysis failed")
            .map_err(|err| ModelExportError {
                message: diagnostic(&err),
            })?;
        let (output_names, output_axes) = resolve_outputs(&output_schema);
        let mut dynamic_axes = input_info.dynamic_axes.clone();
        dynamic_axes.extend(output_axes);

        let request = ExportRequest {
            sample_inputs: ctx.inputs,
            input_names: &input_info.names,
            output_names: &output_names,
            dynamic_axes: &dynamic_axes,
            mode: ctx.mode,
            opset_version: ctx.config.opset_version,
            verbose: ctx.config.log_level < LogLevel::Warning,
            extra_options: &ctx.config.export_extra_options,
        };
        let mut output = ctx
            .exporter
            .export(ctx.model, &request)
            .map_err(|err| ModelExportError {
                message: diagnostic(&err),
            })?;

        if let Some(save) = &ctx.config.save_models {
            save_artifact(save, "exported", ctx.mode, &output.model);
        }

        if ctx.config.run_symbolic_shape_infer {
            output.model = ctx
                .exporter
                .infer_shapes(output.model)
                .context("symbolic shape inference failed")
                .map_err(|err| ModelExportError {
                    message: diagnostic(&err),
                })?;
        }

        if !output.warnings.is_empty() {
            tracing::warn!(
                count = output.warnings.len(),
                "the exporter raised warnings; raise the log level to info to see them"
            );
            for warning in &output.warnings {
                tracing::info!(warning = %warning, "exporter warning");
            }
        }

        self.generation += 1;
        let exported = Arc::new(ExportedRepresentation {
            generation: self.generation,
            model: Arc::from(output.model),
            graph_inputs: output.graph_inputs,
            input_info,
            output_names,
            output_schema,
            dynamic_axes,
            sparsity_candidates: output.sparsity_candidates,
            warnings: output.warnings,
            device: ctx.device,
            mode: ctx.mode,
            duration: start.elapsed(),
        });
        tracing::info!(
            generation = exported.generation,
            duration_ms = exported.duration.as_secs_f64() * 1000.0,
            schema = %format!("{:016x}", exported.schema().fingerprint()),
            model_hash = %format!("{:016x}", exported.model_hash()),
            "exported model"
        );
        self.current = Some(Arc::clone(&exported));
        Ok(exported)
    }
}

/// Debug artifact location: `<path>/<prefix>_<stage>_<mode>.ir`.
pub fn artifact_path(save: &SaveModelsConfig, stage: &str, mode: ExecutionMode) -> PathBuf {
    save.path
        .join(format!("{}_{}_{}.ir", save.name_prefix, stage, mode.as_str()))
}

fn save_artifact(save: &SaveModelsConfig, stage: &str, mode: ExecutionMode, bytes: &[u8]) {
    let path = artifact_path(save, stage, mode);
    let written = fs::create_dir_all(&save.path).and_then(|()| fs::write(&path, bytes));
    match written {
        Ok(()) => tracing::debug!(path = %path.display(), bytes = bytes.len(), "saved artifact"),
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "could not save artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use crate::tensor::{HostTensor, Shape};

    fn schema_of(dims: &[usize]) -> InputSchema {
        let len = dims.iter().product();
        let tensor = HostTensor::from_f32(Shape::new(dims.to_vec()), vec![0.0; len]).expect("tensor");
        schema::compute(&CallArgs::new().arg(tensor)).expect("schema")
    }

    #[test]
    fn empty_cache_always_needs_export() {
        let cache = ExportCache::new(Vec::new());
        assert!(cache.needs_export(&schema_of(&[2]), false));
        assert!(cache.current().is_none());
        assert!(cache.last_schema().is_none());
    }

    #[test]
    fn change_signal_is_consumed_once() {
        let signal = ChangeSignal::new();
        let shared = signal.clone();
        assert!(!signal.take());
        shared.raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!shared.is_raised());
    }

    #[test]
    fn artifact_names_carry_stage_and_mode() {
        let save = SaveModelsConfig {
            path: PathBuf::from("/var/tmp/models"),
            name_prefix: "gpt".to_string(),
        };
        assert_eq!(
            artifact_path(&save, "exported", ExecutionMode::Inference),
            PathBuf::from("/var/tmp/models/gpt_exported_inference.ir")
        );
    }
}
