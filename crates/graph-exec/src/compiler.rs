//! Adapter around the external graph compiler.
//!
//! The adapter turns an [`ExportedRepresentation`] plus a [`GraphBuildConfig`] into a
//! [`CompiledGraph`]. Compiled graphs are immutable and swapped wholesale; a failed compilation
//! keeps the previous graph, which stays consistent with any agent built from it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{CastPropagationConfig, LogLevel, ManagerConfig};
use crate::error::{diagnostic, GraphCompilationError};
use crate::export::{ExecutionMode, ExportedRepresentation, ParameterInfo};

/// Configuration handed to the graph compiler. Built fresh for every compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphBuildConfig {
    pub initializer_names: Vec<String>,
    pub initializer_names_to_train: Vec<String>,
    pub input_names_require_grad: Vec<String>,
    pub build_gradient_graph: bool,
    /// Caches intermediate state so repeated calls (gradient accumulation) are amortized.
    pub enable_caching: bool,
    pub use_memory_efficient_gradient: bool,
    pub enable_compute_optimizer: bool,
    pub cast_propagation: CastPropagationConfig,
    pub log_level: LogLevel,
    /// Concrete input shapes, present only when static-shape compilation is requested.
    pub static_input_shapes: Option<Vec<Vec<usize>>>,
    pub sparse_label_input_names: Vec<String>,
    pub sparse_embedding_input_names: Vec<String>,
}

impl GraphBuildConfig {
    /// Derives the build configuration for `exported`.
    ///
    /// Initializers are the host parameters the exported graph declares as inputs; parameters
    /// missing from the export are excluded silently. The trainable subset further requires
    /// the parameter to be marked trainable.
    pub fn from_export(
        exported: &ExportedRepresentation,
        parameters: &[ParameterInfo],
        mode: ExecutionMode,
        config: &ManagerConfig,
    ) -> Self {
        let declared: HashSet<&str> = exported.graph_inputs.iter().map(String::as_str).collect();
        let present = parameters
            .iter()
            .filter(|param| declared.contains(param.name.as_str()));
        let initializer_names = present.clone().map(|param| param.name.clone()).collect();
        let initializer_names_to_train = present
            .filter(|param| param.requires_grad)
            .map(|param| param.name.clone())
            .collect();

        GraphBuildConfig {
            initializer_names,
            initializer_names_to_train,
            input_names_require_grad: exported.input_info.require_grad_names.clone(),
            build_gradient_graph: mode.is_training(),
            enable_caching: config.enable_grad_acc_optimization,
            use_memory_efficient_gradient: config.use_memory_efficient_gradient,
            enable_compute_optimizer: config.enable_compute_optimizer,
            cast_propagation: config.cast_propagation.clone(),
            log_level: config.log_level,
            static_input_shapes: config
                .use_static_shape
                .then(|| exported.input_info.shapes.clone()),
            sparse_label_input_names: Vec::new(),
            sparse_embedding_input_names: Vec::new(),
        }
    }
}

/// Resolved naming of the compiled graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledGraphInfo {
    pub user_input_names: Vec<String>,
    pub user_input_grad_names: Vec<String>,
    pub output_names: Vec<String>,
    pub initializer_names: Vec<String>,
    pub initializer_names_to_train: Vec<String>,
}

/// External graph compiler: structural analysis, gradient construction, and optimization.
pub trait GraphCompiler {
    fn initialize(&mut self, model: &[u8], config: &GraphBuildConfig) -> anyhow::Result<()>;

    fn graph_info(&self) -> anyhow::Result<CompiledGraphInfo>;

    /// Serialized optimized graph consumed by the execution engine.
    fn compiled_model(&self) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct CompiledGraph {
    pub generation: u64,
    /// Generation of the export this graph was compiled from.
    pub export_generation: u64,
    pub info: CompiledGraphInfo,
    pub model: Arc<[u8]>,
    pub config: GraphBuildConfig,
    pub duration: Duration,
}

pub struct GraphCompilerAdapter {
    compiler: Box<dyn GraphCompiler>,
    current: Option<Arc<CompiledGraph>>,
    generation: u64,
}

impl GraphCompilerAdapter {
    pub fn new(compiler: Box<dyn GraphCompiler>) -> Self {
        GraphCompilerAdapter {
            compiler,
            current: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&Arc<CompiledGraph>> {
        self.current.as_ref()
    }

    /// Whether `exported` requires a compilation.
    ///
    /// Without a compiled graph the answer is always yes. Otherwise a graph compiled from an
    /// older export is rebuilt unless `skip_gradient_check` is set, in which case the warmed
    /// graph is assumed to still match the new export.
    pub fn build_needed(&self, exported: &ExportedRepresentation, skip_gradient_check: bool) -> bool {
        match &self.current {
            None => true,
            Some(graph) => graph.export_generation != exported.generation && !skip_gradient_check,
        }
    }

    pub fn build(
        &mut self,
        config: GraphBuildConfig,
        exported: &ExportedRepresentation,
    ) -> Result<Arc<CompiledGraph>, GraphCompilationError> {
        let start = Instant::now();
        let failed = |err: anyhow::Error| GraphCompilationError {
            message: diagnostic(&err),
        };
        self.compiler
            .initialize(&exported.model, &config)
            .map_err(failed)?;
        let info = self.compiler.graph_info().map_err(failed)?;
        let model = self.compiler.compiled_model().map_err(failed)?;

        self.generation += 1;
        let graph = Arc::new(CompiledGraph {
            generation: self.generation,
            export_generation: exported.generation,
            info,
            model: Arc::from(model),
            config,
            duration: start.elapsed(),
        });
        tracing::info!(
            generation = graph.generation,
            export_generation = graph.export_generation,
            gradient_graph = graph.config.build_gradient_graph,
            duration_ms = graph.duration.as_secs_f64() * 1000.0,
            "compiled graph"
        );
        self.current = Some(Arc::clone(&graph));
        Ok(graph)
    }
}
