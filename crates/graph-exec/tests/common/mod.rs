#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use graph_exec::compiler::{CompiledGraph, CompiledGraphInfo, GraphBuildConfig, GraphCompiler};
use graph_exec::export::{ExportOutput, ExportRequest, HostModel, ModelExporter};
use graph_exec::io::OutputInfo;
use graph_exec::random::with_global_rng;
use graph_exec::{
    CallArgs, Device, ExecutionEngine, ExecutionManager, ExecutionMode, ManagerConfig,
    ParameterInfo, RunInputs, SessionConfig, SparsityCandidate,
};
use rand::Rng;

/// Shared counters and switches observed by the tests.
#[derive(Clone, Default)]
pub struct Tally {
    pub exports: Arc<AtomicUsize>,
    pub compiles: Arc<AtomicUsize>,
    pub sessions: Arc<AtomicUsize>,
    pub runs: Arc<AtomicUsize>,
    pub shape_inferences: Arc<AtomicUsize>,
    pub fail_export: Arc<AtomicBool>,
    pub fail_compile: Arc<AtomicBool>,
    pub fail_session: Arc<AtomicBool>,
    pub fail_run: Arc<AtomicBool>,
    pub fail_infer: Arc<AtomicBool>,
    pub last_build: Arc<Mutex<Option<GraphBuildConfig>>>,
    pub last_session: Arc<Mutex<Option<SessionConfig>>>,
}

impl Tally {
    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shape_inferences(&self) -> usize {
        self.shape_inferences.load(Ordering::SeqCst)
    }

    pub fn last_build(&self) -> GraphBuildConfig {
        self.last_build
            .lock()
            .unwrap()
            .clone()
            .expect("a graph was compiled")
    }

    pub fn last_session(&self) -> SessionConfig {
        self.last_session
            .lock()
            .unwrap()
            .clone()
            .expect("a session was created")
    }
}

pub struct FakeModel {
    pub parameters: Vec<String>,
    pub weights: Vec<ParameterInfo>,
    pub device: Option<Device>,
}

impl FakeModel {
    pub fn new() -> Self {
        FakeModel {
            parameters: vec!["x".to_string(), "labels".to_string()],
            weights: vec![
                ParameterInfo {
                    name: "weight".to_string(),
                    requires_grad: true,
                },
                ParameterInfo {
                    name: "bias".to_string(),
                    requires_grad: false,
                },
                ParameterInfo {
                    name: "orphan".to_string(),
                    requires_grad: true,
                },
            ],
            device: Some(Device::cpu()),
        }
    }
}

impl HostModel for FakeModel {
    fn forward_parameter_names(&self) -> Vec<String> {
        self.parameters.clone()
    }

    fn named_parameters(&self) -> Vec<ParameterInfo> {
        self.weights.clone()
    }

    fn device(&self) -> Option<Device> {
        self.device.clone()
    }

    fn describe_outputs(&self, _call: &CallArgs) -> Result<Vec<OutputInfo>> {
        Ok(vec![OutputInfo {
            name: "logits".to_string(),
            rank: 2,
        }])
    }
}

/// Encodes the graph's input names, one per line, as its serialized model.
pub struct FakeExporter {
    pub tally: Tally,
    pub candidates: Vec<SparsityCandidate>,
    pub warnings: Vec<String>,
}

impl FakeExporter {
    pub fn new(tally: Tally) -> Self {
        FakeExporter {
            tally,
            candidates: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ModelExporter for FakeExporter {
    fn export(&self, model: &dyn HostModel, request: &ExportRequest<'_>) -> Result<ExportOutput> {
        self.tally.exports.fetch_add(1, Ordering::SeqCst);
        // Shape inference in real exporters draws from the global generator.
        with_global_rng(|rng| rng.gen::<u64>());
        if self.tally.fail_export.load(Ordering::SeqCst) {
            bail!("exporter exploded");
        }
        let mut graph_inputs: Vec<String> = request.input_names.to_vec();
        graph_inputs.extend(
            model
                .named_parameters()
                .into_iter()
                .map(|param| param.name)
                .filter(|name| name != "orphan"),
        );
        Ok(ExportOutput {
            model: graph_inputs.join("\n").into_bytes(),
            graph_inputs,
            sparsity_candidates: self.candidates.clone(),
            warnings: self.warnings.clone(),
        })
    }

    fn infer_shapes(&self, model: Vec<u8>) -> Result<Vec<u8>> {
        self.tally.shape_inferences.fetch_add(1, Ordering::SeqCst);
        with_global_rng(|rng| rng.gen::<u64>());
        if self.tally.fail_infer.load(Ordering::SeqCst) {
            bail!("rank mismatch on node MatMul_3");
        }
        Ok(model)
    }
}

pub struct FakeCompiler {
    pub tally: Tally,
    info: CompiledGraphInfo,
    model: Vec<u8>,
}

impl FakeCompiler {
    pub fn new(tally: Tally) -> Self {
        FakeCompiler {
            tally,
            info: CompiledGraphInfo::default(),
            model: Vec::new(),
        }
    }
}

impl GraphCompiler for FakeCompiler {
    fn initialize(&mut self, model: &[u8], config: &GraphBuildConfig) -> Result<()> {
        self.tally.compiles.fetch_add(1, Ordering::SeqCst);
        if self.tally.fail_compile.load(Ordering::SeqCst) {
            bail!("gradient builder rejected the graph");
        }
        let initializers: BTreeSet<&str> =
            config.initializer_names.iter().map(String::as_str).collect();
        let names = String::from_utf8(model.to_vec())?;
        self.info = CompiledGraphInfo {
            user_input_names: names
                .lines()
                .filter(|name| !initializers.contains(name))
                .map(str::to_string)
                .collect(),
            user_input_grad_names: config.input_names_require_grad.clone(),
            output_names: vec!["logits".to_string()],
            initializer_names: config.initializer_names.clone(),
            initializer_names_to_train: config.initializer_names_to_train.clone(),
        };
        self.model = model.to_vec();
        *self.tally.last_build.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn graph_info(&self) -> Result<CompiledGraphInfo> {
        Ok(self.info.clone())
    }

    fn compiled_model(&self) -> Result<Vec<u8>> {
        Ok(self.model.clone())
    }
}

#[derive(Debug)]
pub struct FakeAgent {
    pub id: usize,
    pub graph_generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub agent_id: usize,
    pub graph_generation: u64,
    pub inputs: Vec<String>,
}

pub struct FakeEngine {
    pub tally: Tally,
}

impl ExecutionEngine for FakeEngine {
    type Agent = FakeAgent;
    type Output = RunReport;

    fn create_session(&self, graph: &CompiledGraph, session: &SessionConfig) -> Result<FakeAgent> {
        let id = self.tally.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tally.fail_session.load(Ordering::SeqCst) {
            bail!("no provider could host the graph");
        }
        *self.tally.last_session.lock().unwrap() = Some(session.clone());
        Ok(FakeAgent {
            id,
            graph_generation: graph.generation,
        })
    }

    fn run(&self, agent: &mut FakeAgent, inputs: &RunInputs<'_>) -> Result<RunReport> {
        self.tally.runs.fetch_add(1, Ordering::SeqCst);
        if self.tally.fail_run.load(Ordering::SeqCst) {
            bail!("kernel launch failed");
        }
        Ok(RunReport {
            agent_id: agent.id,
            graph_generation: agent.graph_generation,
            inputs: inputs
                .user_inputs
                .iter()
                .map(|input| input.name.clone())
                .collect(),
        })
    }
}

pub fn manager_with(
    model: FakeModel,
    exporter: FakeExporter,
    config: ManagerConfig,
) -> ExecutionManager<FakeEngine> {
    let tally = exporter.tally.clone();
    ExecutionManager::new(
        Box::new(model),
        Box::new(exporter),
        Box::new(FakeCompiler::new(tally.clone())),
        FakeEngine { tally },
        ExecutionMode::Training,
        config,
    )
    .expect("valid configuration")
}

pub fn manager(config: ManagerConfig) -> (ExecutionManager<FakeEngine>, Tally) {
    let tally = Tally::default();
    let manager = manager_with(FakeModel::new(), FakeExporter::new(tally.clone()), config);
    (manager, tally)
}
