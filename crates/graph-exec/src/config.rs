//! Manager configuration, read once when an [`ExecutionManager`](crate::ExecutionManager) is built.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::{read_bool, read_parsed, read_string};
use crate::error::ConfigError;
use crate::export::REQUIRED_EXPORT_OPTIONS;
use crate::skip_check::SkipCheckFlags;

/// Numeric format (opset) version handed to the exporter unless overridden.
pub const DEFAULT_OPSET_VERSION: u32 = 15;

pub const SKIPCHECK_POLICY_VAR: &str = "GRAPHEXEC_SKIPCHECK_POLICY";
pub const OPSET_VERSION_VAR: &str = "GRAPHEXEC_OPSET_VERSION";
pub const ENABLE_COMPUTE_OPTIMIZER_VAR: &str = "GRAPHEXEC_ENABLE_COMPUTE_OPTIMIZER";
pub const ENABLE_SPARSE_OPTIMIZER_VAR: &str = "GRAPHEXEC_ENABLE_SPARSE_OPTIMIZER";
pub const PRINT_INPUT_DENSITY_VAR: &str = "GRAPHEXEC_PRINT_INPUT_DENSITY";
pub const MEMORY_OPT_CONFIG_VAR: &str = "GRAPHEXEC_MEMORY_OPT_CONFIG";
pub const MEMORY_OPT_PROBE_LEVEL_VAR: &str = "GRAPHEXEC_MEMORY_OPT_PROBE_RECOMPUTE_LEVEL";
pub const CONV_ALGO_SEARCH_VAR: &str = "GRAPHEXEC_CONV_ALGO_SEARCH";
pub const DETERMINISTIC_VAR: &str = "GRAPHEXEC_DETERMINISTIC";
pub const SAVE_MODELS_PATH_VAR: &str = "GRAPHEXEC_SAVE_MODELS_PATH";
pub const SAVE_MODELS_PREFIX_VAR: &str = "GRAPHEXEC_SAVE_MODELS_PREFIX";
pub const LOG_LEVEL_VAR: &str = "GRAPHEXEC_LOG_LEVEL";
pub const RANK_VAR: &str = "RANK";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized value '{0}'")]
pub struct ParseConfigValueError(String);

/// Placement strategy for reduced-precision casts in the compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastPropagationStrategy {
    None,
    InsertAndReduce,
    #[default]
    FloodFill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastPropagationConfig {
    pub strategy: CastPropagationStrategy,
    /// Zero considers only `allow`; 1 and 2 add the compiler's predefined safe opcodes.
    pub level: i32,
    pub allow: Vec<String>,
}

impl Default for CastPropagationConfig {
    fn default() -> Self {
        CastPropagationConfig {
            strategy: CastPropagationStrategy::FloodFill,
            level: 1,
            allow: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvAlgoSearch {
    #[default]
    Heuristic,
    Exhaustive,
}

impl ConvAlgoSearch {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvAlgoSearch::Heuristic => "HEURISTIC",
            ConvAlgoSearch::Exhaustive => "EXHAUSTIVE",
        }
    }
}

impl fmt::Display for ConvAlgoSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConvAlgoSearch {
    type Err = ParseConfigValueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HEURISTIC" => Ok(ConvAlgoSearch::Heuristic),
            "EXHAUSTIVE" => Ok(ConvAlgoSearch::Exhaustive),
            _ => Err(ParseConfigValueError(raw.to_string())),
        }
    }
}

/// Verbosity forwarded to the exporter, compiler, and execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// Severity number understood by the execution engine (0 = verbose, 4 = fatal).
    pub fn severity(self) -> i32 {
        match self {
            LogLevel::Verbose => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
            LogLevel::Fatal => 4,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = ParseConfigValueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "verbose" | "0" => Ok(LogLevel::Verbose),
            "info" | "1" => Ok(LogLevel::Info),
            "warning" | "warn" | "2" => Ok(LogLevel::Warning),
            "error" | "3" => Ok(LogLevel::Error),
            "fatal" | "4" => Ok(LogLevel::Fatal),
            _ => Err(ParseConfigValueError(raw.to_string())),
        }
    }
}

/// Where exported and optimized artifacts are written for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveModelsConfig {
    pub path: PathBuf,
    pub name_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub skip_check: SkipCheckFlags,
    pub opset_version: u32,
    pub enable_compute_optimizer: bool,
    /// Only effective while the compute optimizer is enabled.
    pub enable_sparse_optimizer: bool,
    pub print_input_density: bool,
    /// Inputs whose measured density (percent) falls below this are reported as sparse.
    pub sparsity_density_threshold: f64,
    pub memory_optimizer_config: String,
    pub memory_probe_recompute_level: String,
    pub conv_algo_search: ConvAlgoSearch,
    pub deterministic_compute: bool,
    pub cast_propagation: CastPropagationConfig,
    pub use_static_shape: bool,
    pub run_symbolic_shape_infer: bool,
    pub enable_grad_acc_optimization: bool,
    pub use_memory_efficient_gradient: bool,
    pub save_models: Option<SaveModelsConfig>,
    pub log_level: LogLevel,
    /// Process rank in a distributed job; only rank zero emits reports.
    pub rank: usize,
    pub export_extra_options: BTreeMap<String, String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            skip_check: SkipCheckFlags::default(),
            opset_version: DEFAULT_OPSET_VERSION,
            enable_compute_optimizer: true,
            enable_sparse_optimizer: true,
            print_input_density: false,
            sparsity_density_threshold: 90.0,
            memory_optimizer_config: String::new(),
            memory_probe_recompute_level: "1".to_string(),
            conv_algo_search: ConvAlgoSearch::Heuristic,
            deterministic_compute: false,
            cast_propagation: CastPropagationConfig::default(),
            use_static_shape: false,
            run_symbolic_shape_infer: true,
            enable_grad_acc_optimization: false,
            use_memory_efficient_gradient: false,
            save_models: None,
            log_level: LogLevel::Warning,
            rank: 0,
            export_extra_options: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Reads the process environment once.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ManagerConfig::default();

        let skip_check = match read_string(&lookup, SKIPCHECK_POLICY_VAR) {
            Some(raw) => SkipCheckFlags::parse(&raw).unwrap_or_else(|err| {
                tracing::warn!(key = SKIPCHECK_POLICY_VAR, error = %err, "keeping default skip-check policy");
                defaults.skip_check
            }),
            None => defaults.skip_check,
        };

        let save_models = read_string(&lookup, SAVE_MODELS_PATH_VAR).map(|path| SaveModelsConfig {
            path: PathBuf::from(path),
            name_prefix: read_string(&lookup, SAVE_MODELS_PREFIX_VAR)
                .unwrap_or_else(|| "model".to_string()),
        });

        ManagerConfig {
            skip_check,
            opset_version: read_parsed(&lookup, OPSET_VERSION_VAR, defaults.opset_version),
            enable_compute_optimizer: read_bool(
                &lookup,
                ENABLE_COMPUTE_OPTIMIZER_VAR,
                defaults.enable_compute_optimizer,
            ),
            enable_sparse_optimizer: read_bool(
                &lookup,
                ENABLE_SPARSE_OPTIMIZER_VAR,
                defaults.enable_sparse_optimizer,
            ),
            print_input_density: read_bool(
                &lookup,
                PRINT_INPUT_DENSITY_VAR,
                defaults.print_input_density,
            ),
            memory_optimizer_config: read_string(&lookup, MEMORY_OPT_CONFIG_VAR)
                .unwrap_or(defaults.memory_optimizer_config),
            memory_probe_recompute_level: read_string(&lookup, MEMORY_OPT_PROBE_LEVEL_VAR)
                .unwrap_or(defaults.memory_probe_recompute_level),
            conv_algo_search: read_parsed(&lookup, CONV_ALGO_SEARCH_VAR, defaults.conv_algo_search),
            deterministic_compute: read_bool(
                &lookup,
                DETERMINISTIC_VAR,
                defaults.deterministic_compute,
            ),
            save_models,
            log_level: read_parsed(&lookup, LOG_LEVEL_VAR, defaults.log_level),
            rank: read_parsed(&lookup, RANK_VAR, defaults.rank),
            ..defaults
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError {
            message: err.to_string(),
        })
    }

    /// Sparsity-driven compilation hints require the compute optimizer.
    pub fn sparse_optimizer_active(&self) -> bool {
        self.enable_compute_optimizer && self.enable_sparse_optimizer
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let clashes: Vec<&str> = self
            .export_extra_options
            .keys()
            .map(String::as_str)
            .filter(|key| REQUIRED_EXPORT_OPTIONS.contains(key))
            .collect();
        if !clashes.is_empty() {
            return Err(ConfigError {
                message: format!(
                    "the following exporter arguments cannot be specified: {}",
                    clashes.join(", ")
                ),
            });
        }
        if !(self.sparsity_density_threshold > 0.0 && self.sparsity_density_threshold <= 100.0) {
            return Err(ConfigError {
                message: format!(
                    "sparsity density threshold {} is outside (0, 100]",
                    self.sparsity_density_threshold
                ),
            });
        }
        if !(0..=2).contains(&self.cast_propagation.level) {
            return Err(ConfigError {
                message: format!(
                    "cast propagation level {} is outside 0..=2",
                    self.cast_propagation.level
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::skip_check::SkipCheck;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(ManagerConfig::from_lookup(|_| None), ManagerConfig::default());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = ManagerConfig::from_lookup(lookup_from(&[
            (SKIPCHECK_POLICY_VAR, "SKIP_CHECK_DISABLED"),
            (OPSET_VERSION_VAR, "17"),
            (ENABLE_COMPUTE_OPTIMIZER_VAR, "0"),
            (PRINT_INPUT_DENSITY_VAR, "1"),
            (CONV_ALGO_SEARCH_VAR, "exhaustive"),
            (SAVE_MODELS_PATH_VAR, "/tmp/artifacts"),
            (RANK_VAR, "3"),
        ]));
        assert!(config.skip_check.is_disabled());
        assert!(!config.skip_check.is_set(SkipCheck::Device));
        assert_eq!(config.opset_version, 17);
        assert!(!config.enable_compute_optimizer);
        assert!(!config.sparse_optimizer_active());
        assert!(config.print_input_density);
        assert_eq!(config.conv_algo_search, ConvAlgoSearch::Exhaustive);
        assert_eq!(
            config.save_models,
            Some(SaveModelsConfig {
                path: PathBuf::from("/tmp/artifacts"),
                name_prefix: "model".to_string(),
            })
        );
        assert_eq!(config.rank, 3);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = ManagerConfig::from_lookup(lookup_from(&[
            (SKIPCHECK_POLICY_VAR, "SKIP_CHECK_NOTHING"),
            (CONV_ALGO_SEARCH_VAR, "FASTEST"),
        ]));
        assert_eq!(config.skip_check, SkipCheckFlags::default());
        assert_eq!(config.conv_algo_search, ConvAlgoSearch::Heuristic);
    }

    #[test]
    fn json_config_fills_missing_fields_with_defaults() {
        let config = ManagerConfig::from_json_str(
            r#"{"skip_check": "SKIP_CHECK_DEVICE", "cast_propagation": {"level": 2}}"#,
        )
        .expect("config should parse");
        assert_eq!(
            config.skip_check,
            SkipCheckFlags::empty().with(SkipCheck::Device)
        );
        assert_eq!(config.cast_propagation.level, 2);
        assert_eq!(
            config.cast_propagation.strategy,
            CastPropagationStrategy::FloodFill
        );
        assert_eq!(config.opset_version, DEFAULT_OPSET_VERSION);
    }

    #[test]
    fn validation_rejects_required_exporter_arguments() {
        let mut config = ManagerConfig::default();
        config
            .export_extra_options
            .insert("opset_version".to_string(), "12".to_string());
        let err = config.validate().expect_err("must reject");
        assert!(err.message.contains("opset_version"));
    }
}
