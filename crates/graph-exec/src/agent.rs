//! Agent cache: owns the execution agent bound to the current compiled graph.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::compiler::{CompiledGraph, CompiledGraphInfo};
use crate::config::ManagerConfig;
use crate::device::{Device, DeviceKind};
use crate::error::{diagnostic, AgentBuildError, ExecutionError};
use crate::export::{artifact_path, ExecutionMode};
use crate::io::NamedInput;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionProvider {
    Cuda,
    Rocm,
    Cpu,
    Custom(String),
}

impl ExecutionProvider {
    pub fn name(&self) -> &str {
        match self {
            ExecutionProvider::Cuda => "CUDAExecutionProvider",
            ExecutionProvider::Rocm => "ROCMExecutionProvider",
            ExecutionProvider::Cpu => "CPUExecutionProvider",
            ExecutionProvider::Custom(name) => name,
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOrder {
    Default,
    PriorityBased,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub enable_mem_pattern: bool,
    pub enable_mem_reuse: bool,
    pub use_deterministic_compute: bool,
    pub execution_order: ExecutionOrder,
    pub log_severity_level: i32,
    pub config_entries: BTreeMap<String, String>,
    pub optimized_model_filepath: Option<PathBuf>,
}

/// Provider preference list, per-provider options, and session options for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub providers: Vec<ExecutionProvider>,
    pub provider_options: Vec<BTreeMap<String, String>>,
    pub options: SessionOptions,
}

impl SessionConfig {
    /// Accelerator provider first when the device asks for one, CPU last as the fallback.
    pub fn for_device(device: &Device, mode: ExecutionMode, config: &ManagerConfig) -> Self {
        let mut accelerator_options = BTreeMap::new();
        accelerator_options.insert("device_id".to_string(), device.index.to_string());

        let accelerator = match &device.kind {
            DeviceKind::Cpu => None,
            DeviceKind::Cuda => {
                accelerator_options.insert(
                    "cudnn_conv_algo_search".to_string(),
                    config.conv_algo_search.to_string(),
                );
                accelerator_options.insert("cudnn_conv_use_max_workspace".to_string(), "1".to_string());
                accelerator_options.insert("cudnn_conv1d_pad_to_nc1d".to_string(), "1".to_string());
                Some(ExecutionProvider::Cuda)
            }
            DeviceKind::Rocm => Some(ExecutionProvider::Rocm),
            DeviceKind::Custom(name) => Some(ExecutionProvider::Custom(name.clone())),
        };

        let mut providers = Vec::new();
        let mut provider_options = Vec::new();
        if let Some(provider) = accelerator {
            providers.push(provider);
            provider_options.push(accelerator_options);
        }
        providers.push(ExecutionProvider::Cpu);
        provider_options.push(BTreeMap::new());

        let mut config_entries = BTreeMap::new();
        config_entries.insert(
            "optimization.enable_memory_optimizer".to_string(),
            config.memory_optimizer_config.clone(),
        );
        config_entries.insert(
            "optimization.enable_memory_probe_recompute_level".to_string(),
            config.memory_probe_recompute_level.clone(),
        );
        config_entries.insert("session.disable_prepacking".to_string(), "1".to_string());

        SessionConfig {
            providers,
            provider_options,
            options: SessionOptions {
                enable_mem_pattern: false,
                enable_mem_reuse: false,
                use_deterministic_compute: config.deterministic_compute,
                execution_order: ExecutionOrder::PriorityBased,
                log_severity_level: config.log_level.severity(),
                config_entries,
                optimized_model_filepath: config
                    .save_models
                    .as_ref()
                    .map(|save| artifact_path(save, "execution_model", mode)),
            },
        }
    }
}

/// Inputs of one run, ordered as the compiled graph expects them.
pub struct RunInputs<'a> {
    pub graph: &'a CompiledGraphInfo,
    pub user_inputs: Vec<&'a NamedInput>,
    pub initializer_names: &'a [String],
}

/// External engine that turns compiled graphs into runnable agents.
pub trait ExecutionEngine {
    type Agent;
    type Output;

    fn create_session(
        &self,
        graph: &CompiledGraph,
        session: &SessionConfig,
    ) -> anyhow::Result<Self::Agent>;

    fn run(&self, agent: &mut Self::Agent, inputs: &RunInputs<'_>) -> anyhow::Result<Self::Output>;
}

struct AgentEntry<A> {
    agent: A,
    graph_generation: u64,
    device: Device,
}

pub struct AgentCache<E: ExecutionEngine> {
    engine: E,
    current: Option<AgentEntry<E::Agent>>,
}

impl<E: ExecutionEngine> AgentCache<E> {
    pub fn new(engine: E) -> Self {
        AgentCache {
            engine,
            current: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether the agent must be rebuilt for `graph` on `device`.
    ///
    /// With `skip_reuse_check` an existing agent is trusted to match whatever graph was compiled
    /// since; only the very first agent is ever built.
    pub fn needs_rebuild(&self, graph: &CompiledGraph, device: &Device, skip_reuse_check: bool) -> bool {
        match &self.current {
            None => true,
            Some(entry) => {
                !skip_reuse_check
                    && (entry.graph_generation != graph.generation || entry.device != *device)
            }
        }
    }

    pub fn rebuild(
        &mut self,
        graph: &CompiledGraph,
        device: &Device,
        mode: ExecutionMode,
        config: &ManagerConfig,
    ) -> Result<(), AgentBuildError> {
        if config.deterministic_compute {
            tracing::info!("deterministic compute is enabled for the execution agent");
        }
        let session = SessionConfig::for_device(device, mode, config);
        let agent = self
            .engine
            .create_session(graph, &session)
            .map_err(|err| AgentBuildError {
                message: diagnostic(&err),
            })?;
        tracing::info!(
            graph_generation = graph.generation,
            device = %device,
            providers = ?session.providers.iter().map(ExecutionProvider::name).collect::<Vec<_>>(),
            "created execution agent"
        );
        self.current = Some(AgentEntry {
            agent,
            graph_generation: graph.generation,
            device: device.clone(),
        });
        Ok(())
    }

    pub fn run(&mut self, inputs: &RunInputs<'_>) -> Result<E::Output, ExecutionError> {
        let entry = self.current.as_mut().ok_or_else(|| ExecutionError {
            message: "no execution agent has been built".to_string(),
        })?;
        self.engine
            .run(&mut entry.agent, inputs)
            .map_err(|err| ExecutionError {
                message: diagnostic(&err),
            })
    }
}
