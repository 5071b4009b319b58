//! Per-call orchestration: schema, export, compilation, agent, execution.
//!
//! Every call runs the same pipeline to completion:
//!
//! 1. compute the [`InputSchema`](crate::schema::InputSchema) of the call and resolve its device;
//! 2. re-export when no export exists, the schema changed, the device changed (unless the device
//!    check is skipped), or the model signalled a change;
//! 3. compile when the export is newer than the compiled graph (or once, when the gradient-graph
//!    check is skipped), optionally feeding sparsity hints to the compiler first;
//! 4. rebuild the execution agent when the graph changed (or once, when the agent-reuse check is
//!    skipped);
//! 5. hand the agent and realized inputs to the execution engine.
//!
//! Each stage either fully succeeds and swaps its cached artifact, or fails and leaves the cache
//! untouched. Calls on one manager must be serialized by the caller.

use std::sync::Arc;

use crate::agent::{AgentCache, ExecutionEngine, RunInputs};
use crate::compiler::{CompiledGraph, GraphBuildConfig, GraphCompiler, GraphCompilerAdapter};
use crate::config::ManagerConfig;
use crate::device::{resolve_device, Device};
use crate::error::{ExecutionError, ManagerError, ManagerResult};
use crate::export::{
    ChangeSignal, ExecutionMode, ExportCache, ExportContext, ExportedRepresentation, HostModel,
    ModelExporter,
};
use crate::io::{flatten_call, NamedInput};
use crate::random::{GlobalRng, RandomStateSource};
use crate::report::FeatureReport;
use crate::schema;
use crate::skip_check::{SkipCheck, SkipCheckPolicy};
use crate::sparsity::{SparsityAdvisor, SparsityProfile};
use crate::tensor::CallArgs;

/// What the most recent call did.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTrace {
    pub schema_fingerprint: u64,
    pub device: Device,
    pub exported: bool,
    pub compiled: bool,
    pub agent_rebuilt: bool,
    pub sparsity: Option<SparsityProfile>,
}

pub struct ExecutionManager<E: ExecutionEngine> {
    model: Box<dyn HostModel>,
    exporter: Box<dyn ModelExporter>,
    config: ManagerConfig,
    policy: SkipCheckPolicy,
    mode: ExecutionMode,
    export_cache: ExportCache,
    compiler: GraphCompilerAdapter,
    advisor: SparsityAdvisor,
    agents: AgentCache<E>,
    change_signal: ChangeSignal,
    device: Option<Device>,
    report: Option<FeatureReport>,
    last_call: Option<CallTrace>,
}

impl<E: ExecutionEngine> ExecutionManager<E> {
    pub fn new(
        model: Box<dyn HostModel>,
        exporter: Box<dyn ModelExporter>,
        compiler: Box<dyn GraphCompiler>,
        engine: E,
        mode: ExecutionMode,
        config: ManagerConfig,
    ) -> ManagerResult<Self> {
        config.validate()?;
        if model.accepts_var_keyword() {
            tracing::info!("model accepts arbitrary keyword arguments; this support is experimental");
        }
        tracing::debug!(
            mode = mode.as_str(),
            skip_check = %config.skip_check,
            opset_version = config.opset_version,
            "created execution manager"
        );
        let sources: Vec<Arc<dyn RandomStateSource>> = vec![Arc::new(GlobalRng)];
        Ok(ExecutionManager {
            model,
            exporter,
            policy: SkipCheckPolicy::new(config.skip_check),
            advisor: SparsityAdvisor::new(config.sparsity_density_threshold),
            config,
            mode,
            export_cache: ExportCache::new(sources),
            compiler: GraphCompilerAdapter::new(compiler),
            agents: AgentCache::new(engine),
            change_signal: ChangeSignal::new(),
            device: None,
            report: None,
            last_call: None,
        })
    }

    /// Replaces the random-state sources preserved around every export.
    pub fn with_random_sources(mut self, sources: Vec<Arc<dyn RandomStateSource>>) -> Self {
        self.export_cache = ExportCache::new(sources);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn model(&self) -> &dyn HostModel {
        self.model.as_ref()
    }

    pub fn engine(&self) -> &E {
        self.agents.engine()
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn exported(&self) -> Option<&Arc<ExportedRepresentation>> {
        self.export_cache.current()
    }

    pub fn compiled_graph(&self) -> Option<&Arc<CompiledGraph>> {
        self.compiler.current()
    }

    pub fn last_call(&self) -> Option<&CallTrace> {
        self.last_call.as_ref()
    }

    /// Feature report logged after the first successful compilation.
    pub fn feature_report(&self) -> Option<&FeatureReport> {
        self.report.as_ref()
    }

    /// Handle collaborators can keep to flag structural model changes.
    pub fn change_signal(&self) -> ChangeSignal {
        self.change_signal.clone()
    }

    /// Forces a re-export on the next call.
    pub fn signal_model_changed(&self) {
        self.change_signal.raise();
    }

    pub fn run(&mut self, call: &CallArgs) -> ManagerResult<E::Output> {
        let schema = schema::compute(call)?;
        let resolved = resolve_device(self.model.device(), call)?;
        let inputs = flatten_call(
            &self.model.forward_parameter_names(),
            self.model.accepts_var_keyword(),
            call,
        )?;

        let (device, device_changed) = match &self.device {
            Some(previous) if *previous != resolved => {
                if self.policy.skips(SkipCheck::Device) {
                    (previous.clone(), false)
                } else {
                    tracing::debug!(from = %previous, to = %resolved, "device changed");
                    (resolved, true)
                }
            }
            _ => (resolved, false),
        };

        let mut trace = CallTrace {
            schema_fingerprint: schema.fingerprint(),
            device: device.clone(),
            exported: false,
            compiled: false,
            agent_rebuilt: false,
            sparsity: None,
        };

        let signalled = self.change_signal.take();
        let export_needed = self
            .export_cache
            .needs_export(&schema, signalled || device_changed);
        tracing::debug!(export_needed, signalled, device_changed, "export decision");

        let cached = if export_needed {
            None
        } else {
            self.export_cache.current().cloned()
        };
        let exported = match cached {
            Some(exported) => exported,
            None => {
                let result = self.export_cache.export(ExportContext {
                    model: self.model.as_ref(),
                    exporter: self.exporter.as_ref(),
                    call,
                    inputs: &inputs,
                    schema,
                    device: device.clone(),
                    mode: self.mode,
                    config: &self.config,
                });
                match result {
                    Ok(exported) => {
                        self.device = Some(device.clone());
                        trace.exported = true;
                        exported
                    }
                    Err(err) => {
                        if signalled {
                            self.change_signal.raise();
                        }
                        return Err(err.into());
                    }
                }
            }
        };

        let buffers = self.model.named_buffers();
        let build_needed = self
            .compiler
            .build_needed(&exported, self.policy.skips(SkipCheck::BuildGradient));
        tracing::debug!(build_needed, export_generation = exported.generation, "build decision");

        let reusable = self.compiler.current().filter(|_| !build_needed).cloned();
        let graph = match reusable {
            Some(graph) => graph,
            None => {
                let graph = self.compile(&exported, &inputs, &buffers, &device, &mut trace)?;
                trace.compiled = true;
                graph
            }
        };
        if !trace.compiled && self.advisor.is_enabled() {
            let profile = self.advisor.profile(
                &exported,
                &graph.info.initializer_names,
                &inputs,
                &buffers,
                &device,
            );
            self.report_density(&profile);
            trace.sparsity = Some(profile);
        }
        if !(self.config.print_input_density && self.config.sparse_optimizer_active()) {
            self.advisor.disable();
        }

        // A device change makes any existing agent unusable.
        let skip_reuse = self.policy.skips(SkipCheck::ExecutionAgent) && !device_changed;
        let agent_needed = self.agents.needs_rebuild(&graph, &device, skip_reuse);
        tracing::debug!(agent_needed, graph_generation = graph.generation, "agent decision");
        if agent_needed {
            self.agents.rebuild(&graph, &device, self.mode, &self.config)?;
            trace.agent_rebuilt = true;
        }
        self.last_call = Some(trace);

        let user_inputs = graph
            .info
            .user_input_names
            .iter()
            .map(|name| {
                inputs
                    .iter()
                    .chain(&buffers)
                    .find(|input| input.name == *name)
                    .ok_or_else(|| ExecutionError {
                        message: format!("graph input `{name}` has no value in this call"),
                    })
            })
            .collect::<Result<Vec<&NamedInput>, ExecutionError>>()?;
        let run_inputs = RunInputs {
            graph: &graph.info,
            user_inputs,
            initializer_names: &graph.info.initializer_names,
        };
        self.agents.run(&run_inputs).map_err(ManagerError::from)
    }

    fn compile(
        &mut self,
        exported: &ExportedRepresentation,
        inputs: &[NamedInput],
        buffers: &[NamedInput],
        device: &Device,
        trace: &mut CallTrace,
    ) -> ManagerResult<Arc<CompiledGraph>> {
        let mut build = GraphBuildConfig::from_export(
            exported,
            &self.model.named_parameters(),
            self.mode,
            &self.config,
        );

        let sparse = self.config.sparse_optimizer_active();
        let mut profile = SparsityProfile::default();
        if sparse || self.config.print_input_density {
            self.advisor.enable(&exported.input_info.names);
            profile =
                self.advisor
                    .profile(exported, &build.initializer_names, inputs, buffers, device);
            if sparse {
                SparsityAdvisor::apply(&profile, &mut build);
            }
            self.report_density(&profile);
            trace.sparsity = Some(profile.clone());
        }

        let graph = self.compiler.build(build, exported)?;
        if self.report.is_none() {
            let report = FeatureReport::build(&self.config, &graph.config, &profile, exported);
            report.log(self.config.rank);
            self.report = Some(report);
        }
        Ok(graph)
    }

    fn report_density(&self, profile: &SparsityProfile) {
        if !self.config.print_input_density || self.config.rank != 0 || profile.is_empty() {
            return;
        }
        tracing::info!(
            label = %SparsityProfile::describe(&profile.label),
            embedding = %SparsityProfile::describe(&profile.embedding),
            "input density"
        );
    }
}
