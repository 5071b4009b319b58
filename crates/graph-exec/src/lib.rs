pub mod agent;
pub mod compiler;
pub mod config;
pub mod device;
mod env;
pub mod error;
pub mod export;
pub mod hashing;
pub mod io;
pub mod manager;
pub mod random;
pub mod report;
pub mod schema;
pub mod skip_check;
pub mod sparsity;
pub mod tensor;

pub use agent::{AgentCache, ExecutionEngine, ExecutionProvider, RunInputs, SessionConfig};
pub use compiler::{CompiledGraph, CompiledGraphInfo, GraphBuildConfig, GraphCompiler};
pub use config::ManagerConfig;
pub use device::{Device, DeviceKind};
pub use error::{ManagerError, ManagerResult};
pub use export::{
    ChangeSignal, ExecutionMode, ExportOutput, ExportRequest, ExportedRepresentation, HostModel,
    ModelExporter, ParameterInfo, SparsityCandidate,
};
pub use manager::{CallTrace, ExecutionManager};
pub use schema::InputSchema;
pub use skip_check::{SkipCheck, SkipCheckFlags, SkipCheckPolicy};
pub use tensor::{ArgValue, CallArgs, DType, HostTensor, Shape};
