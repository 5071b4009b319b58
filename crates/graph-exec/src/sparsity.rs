//! Runtime inspection of input density for sparsity-aware compilation hints.
//!
//! The exporter classifies which graph inputs carry labels (with an ignore index) or embedding
//! indices (with a padding index). While enabled, the advisor samples the realized tensors of
//! those inputs and measures the share of entries that are not padding. Inputs whose density
//! falls below the configured threshold are recommended to the graph compiler, which can then
//! drop the padded rows before expensive compute.

use std::collections::BTreeMap;

use crate::compiler::GraphBuildConfig;
use crate::device::Device;
use crate::export::{ExportedRepresentation, SparsityCandidate};
use crate::io::NamedInput;

/// Density percentages of sparse inputs, split by consumer kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparsityProfile {
    pub label: BTreeMap<String, f64>,
    pub embedding: BTreeMap<String, f64>,
}

impl SparsityProfile {
    pub fn is_empty(&self) -> bool {
        self.label.is_empty() && self.embedding.is_empty()
    }

    /// `name:density%` pairs joined by commas.
    pub fn describe(densities: &BTreeMap<String, f64>) -> String {
        densities
            .iter()
            .map(|(name, density)| format!("{name}:{density:.0}%"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug)]
pub struct SparsityAdvisor {
    enabled: bool,
    user_input_names: Vec<String>,
    threshold: f64,
}

impl SparsityAdvisor {
    pub fn new(threshold: f64) -> Self {
        SparsityAdvisor {
            enabled: false,
            user_input_names: Vec::new(),
            threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts inspecting the given user inputs on subsequent calls.
    pub fn enable(&mut self, user_input_names: &[String]) {
        self.enabled = true;
        self.user_input_names = user_input_names.to_vec();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.user_input_names.clear();
    }

    /// Measures density for every classified user input. Returns an empty profile while disabled.
    pub fn profile(
        &self,
        exported: &ExportedRepresentation,
        initializers: &[String],
        inputs: &[NamedInput],
        buffers: &[NamedInput],
        device: &Device,
    ) -> SparsityProfile {
        let mut profile = SparsityProfile::default();
        if !self.enabled {
            return profile;
        }
        for candidate in &exported.sparsity_candidates {
            let name = candidate.input();
            if !self.user_input_names.iter().any(|input| input == name)
                || initializers.iter().any(|init| init == name)
            {
                continue;
            }
            let Some(realized) = inputs
                .iter()
                .chain(buffers)
                .find(|input| input.name == name)
            else {
                continue;
            };
            let (sentinel, target) = match candidate {
                SparsityCandidate::Label { ignore_index, .. } => (*ignore_index, &mut profile.label),
                SparsityCandidate::Embedding { padding_idx, .. } => {
                    (*padding_idx, &mut profile.embedding)
                }
            };
            let total = realized.tensor.data().len();
            let Some(valid) = realized.tensor.count_not_equal(sentinel) else {
                tracing::debug!(input = name, dtype = ?realized.tensor.dtype(), "skipping non-integer sparsity candidate");
                continue;
            };
            if total == 0 {
                continue;
            }
            let density = valid as f64 * 100.0 / total as f64;
            tracing::debug!(input = name, density, device = %device, "measured input density");
            if density < self.threshold {
                target.insert(name.to_string(), density);
            }
        }
        profile
    }

    /// Injects sparse input names into the next compilation's configuration.
    pub fn apply(profile: &SparsityProfile, config: &mut GraphBuildConfig) {
        if !profile.label.is_empty() {
            config.sparse_label_input_names = profile.label.keys().cloned().collect();
            tracing::info!(
                inputs = %SparsityProfile::describe(&profile.label),
                "label sparsity-based optimization is ON"
            );
        }
        if !profile.embedding.is_empty() {
            config.sparse_embedding_input_names = profile.embedding.keys().cloned().collect();
            tracing::info!(
                inputs = %SparsityProfile::describe(&profile.embedding),
                "embedding sparsity-based optimization is ON"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ManagerConfig;
    use crate::export::ExecutionMode;
    use crate::io::InputInfo;
    use crate::schema;
    use crate::tensor::{CallArgs, HostTensor, Shape};

    fn exported(candidates: Vec<SparsityCandidate>) -> ExportedRepresentation {
        let schema = schema::compute(&CallArgs::new()).expect("empty call has a schema");
        ExportedRepresentation {
            generation: 1,
            model: Arc::from(Vec::new()),
            graph_inputs: vec!["labels".into(), "ids".into(), "weight".into()],
            input_info: InputInfo::new(&[], schema),
            output_names: Vec::new(),
            output_schema: Vec::new(),
            dynamic_axes: Default::default(),
            sparsity_candidates: candidates,
            warnings: Vec::new(),
            device: Device::cpu(),
            mode: ExecutionMode::Training,
            duration: Duration::ZERO,
        }
    }

    fn input(name: &str, values: Vec<i64>) -> NamedInput {
        NamedInput {
            name: name.to_string(),
            tensor: HostTensor::from_i64(Shape::new([values.len()]), values).expect("tensor"),
        }
    }

    fn user_names() -> Vec<String> {
        vec!["labels".to_string(), "ids".to_string()]
    }

    #[test]
    fn disabled_advisor_reports_nothing() {
        let advisor = SparsityAdvisor::new(90.0);
        let exported = exported(vec![SparsityCandidate::Label {
            input: "labels".into(),
            ignore_index: -100,
        }]);
        let inputs = [input("labels", vec![-100, -100, 3, -100])];
        let profile = advisor.profile(&exported, &[], &inputs, &[], &Device::cpu());
        assert!(profile.is_empty());
    }

    #[test]
    fn measures_label_and_embedding_density() {
        let mut advisor = SparsityAdvisor::new(90.0);
        advisor.enable(&user_names());
        let exported = exported(vec![
            SparsityCandidate::Label {
                input: "labels".into(),
                ignore_index: -100,
            },
            SparsityCandidate::Embedding {
                input: "ids".into(),
                padding_idx: 0,
            },
        ]);
        let inputs = [
            input("labels", vec![-100, -100, 3, -100]),
            input("ids", vec![5, 7, 0, 0, 0]),
        ];
        let profile = advisor.profile(&exported, &[], &inputs, &[], &Device::cpu());
        assert_eq!(profile.label.get("labels"), Some(&25.0));
        assert_eq!(profile.embedding.get("ids"), Some(&40.0));
        assert_eq!(SparsityProfile::describe(&profile.embedding), "ids:40%");
    }

    #[test]
    fn dense_inputs_and_initializers_are_excluded() {
        let mut advisor = SparsityAdvisor::new(90.0);
        advisor.enable(&user_names());
        let exported = exported(vec![
            SparsityCandidate::Label {
                input: "labels".into(),
                ignore_index: -100,
            },
            SparsityCandidate::Embedding {
                input: "ids".into(),
                padding_idx: 0,
            },
        ]);
        let inputs = [
            input("labels", vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
            input("ids", vec![0, 0, 1]),
        ];
        let initializers = vec!["ids".to_string()];
        let profile = advisor.profile(&exported, &initializers, &inputs, &[], &Device::cpu());
        assert!(profile.is_empty());
    }

    #[test]
    fn buffers_are_inspected_and_non_user_inputs_skipped() {
        let mut advisor = SparsityAdvisor::new(90.0);
        advisor.enable(&["ids".to_string()]);
        let exported = exported(vec![
            SparsityCandidate::Label {
                input: "labels".into(),
                ignore_index: -100,
            },
            SparsityCandidate::Embedding {
                input: "ids".into(),
                padding_idx: 0,
            },
        ]);
        let inputs = [input("labels", vec![-100, -100])];
        let buffers = [input("ids", vec![0, 3])];
        let profile = advisor.profile(&exported, &[], &inputs, &buffers, &Device::cpu());
        assert!(profile.label.is_empty());
        assert_eq!(profile.embedding.get("ids"), Some(&50.0));

        advisor.disable();
        assert!(!advisor.is_enabled());
        assert!(advisor
            .profile(&exported, &[], &inputs, &buffers, &Device::cpu())
            .is_empty());
    }

    #[test]
    fn apply_injects_names_into_build_config() {
        let exported = exported(Vec::new());
        let mut config = GraphBuildConfig::from_export(
            &exported,
            &[],
            ExecutionMode::Training,
            &ManagerConfig::default(),
        );
        let mut profile = SparsityProfile::default();
        profile.label.insert("labels".to_string(), 12.5);
        SparsityAdvisor::apply(&profile, &mut config);
        assert_eq!(config.sparse_label_input_names, vec!["labels".to_string()]);
        assert!(config.sparse_embedding_input_names.is_empty());
    }
}
