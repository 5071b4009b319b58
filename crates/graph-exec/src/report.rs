//! Feature report emitted once, on rank zero, after the first successful compilation.

use std::collections::BTreeMap;

use crate::compiler::GraphBuildConfig;
use crate::config::{CastPropagationStrategy, ManagerConfig, LOG_LEVEL_VAR, MEMORY_OPT_CONFIG_VAR};
use crate::export::ExportedRepresentation;
use crate::sparsity::SparsityProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRow {
    pub feature: String,
    pub enabled: bool,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub rows: Vec<FeatureRow>,
    pub notes: Vec<String>,
}

impl FeatureReport {
    pub fn build(
        config: &ManagerConfig,
        build: &GraphBuildConfig,
        profile: &SparsityProfile,
        exported: &ExportedRepresentation,
    ) -> Self {
        let mut report = FeatureReport::default();

        let cast = &build.cast_propagation;
        let cast_description = match cast.strategy {
            CastPropagationStrategy::None => "disabled".to_string(),
            strategy => format!("{strategy:?} at level {}", cast.level),
        };
        report.push(
            "Cast propagation",
            cast.strategy != CastPropagationStrategy::None,
            cast_description,
        );

        let memory_enabled = !config.memory_optimizer_config.is_empty();
        let memory_description = if memory_enabled {
            format!(
                "plan '{}', probe recompute level {}",
                config.memory_optimizer_config, config.memory_probe_recompute_level
            )
        } else {
            format!("enable with {MEMORY_OPT_CONFIG_VAR}=<plan>")
        };
        report.push("Memory optimizer", memory_enabled, memory_description);

        report.push(
            "Compute optimizer",
            build.enable_compute_optimizer,
            "reduces compute on sliced and gathered inputs".to_string(),
        );
        report.push(
            " - label sparsity",
            !build.sparse_label_input_names.is_empty(),
            density_description(&profile.label, "label inputs"),
        );
        report.push(
            " - embedding sparsity",
            !build.sparse_embedding_input_names.is_empty(),
            density_description(&profile.embedding, "embedding inputs"),
        );

        report.notes.push(format!(
            "Total export time: {:.2} ms",
            exported.duration.as_secs_f64() * 1000.0
        ));
        if !exported.warnings.is_empty() {
            report.notes.push(format!(
                "The exporter emitted {} warnings; set {LOG_LEVEL_VAR}=info to see them",
                exported.warnings.len()
            ));
        }
        report
    }

    fn push(&mut self, feature: &str, enabled: bool, description: String) {
        self.rows.push(FeatureRow {
            feature: feature.to_string(),
            enabled,
            description,
        });
    }

    pub fn render(&self) -> String {
        let feature_width = self
            .rows
            .iter()
            .map(|row| row.feature.len())
            .max()
            .unwrap_or(0)
            .max("feature".len());
        let state_width = "state".len();

        let mut output = String::new();
        output.push_str("Graph execution features\n");
        output.push_str(&format!(
            "| {feature} | {state} | description\n",
            feature = format_args!("{:<width$}", "feature", width = feature_width),
            state = format_args!("{:<width$}", "state", width = state_width),
        ));
        output.push_str(&format!(
            "|-{feature}-|-{state}-|------------\n",
            feature = "-".repeat(feature_width),
            state = "-".repeat(state_width),
        ));
        for row in &self.rows {
            output.push_str(&format!(
                "| {feature} | {state} | {description}\n",
                feature = format_args!("{:<width$}", row.feature, width = feature_width),
                state = format_args!(
                    "{:<width$}",
                    if row.enabled { "ON" } else { "OFF" },
                    width = state_width
                ),
                description = row.description,
            ));
        }
        for note in &self.notes {
            output.push_str(note);
            output.push('\n');
        }
        output
    }

    /// Logs the report on rank zero only.
    pub fn log(&self, rank: usize) {
        if rank != 0 {
            return;
        }
        tracing::info!("{}", self.render());
    }
}

fn density_description(densities: &BTreeMap<String, f64>, kind: &str) -> String {
    if densities.is_empty() {
        format!("no sparse {kind} detected")
    } else {
        format!("input density: {}", SparsityProfile::describe(densities))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::device::Device;
    use crate::export::ExecutionMode;
    use crate::io::InputInfo;
    use crate::schema;
    use crate::tensor::CallArgs;

    fn exported(warnings: Vec<String>) -> ExportedRepresentation {
        let schema = schema::compute(&CallArgs::new()).expect("schema");
        ExportedRepresentation {
            generation: 1,
            model: Arc::from(Vec::new()),
            graph_inputs: Vec::new(),
            input_info: InputInfo::new(&[], schema),
            output_names: Vec::new(),
            output_schema: Vec::new(),
            dynamic_axes: Default::default(),
            sparsity_candidates: Vec::new(),
            warnings,
            device: Device::cpu(),
            mode: ExecutionMode::Training,
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn report_lists_sparsity_and_warning_notice() {
        let config = ManagerConfig::default();
        let exported = exported(vec!["unsupported op folded".to_string()]);
        let mut build =
            GraphBuildConfig::from_export(&exported, &[], ExecutionMode::Training, &config);
        build.sparse_label_input_names = vec!["labels".to_string()];
        let mut profile = SparsityProfile::default();
        profile.label.insert("labels".to_string(), 30.0);

        let report = FeatureReport::build(&config, &build, &profile, &exported);
        let label = report
            .rows
            .iter()
            .find(|row| row.feature.contains("label"))
            .expect("label row");
        assert!(label.enabled);
        assert_eq!(label.description, "input density: labels:30%");

        let memory = report
            .rows
            .iter()
            .find(|row| row.feature == "Memory optimizer")
            .expect("memory row");
        assert!(!memory.enabled);

        assert_eq!(report.notes.len(), 2);
        let rendered = report.render();
        assert!(rendered.contains("| Compute optimizer"));
        assert!(rendered.contains("Total export time: 12.00 ms"));
        assert!(rendered.contains("1 warnings"));
    }
}
