//! Maps call arguments onto named graph inputs and derives dynamic axes.
//!
//! Positional arguments bind to the host model's declared forward parameters in order; keyword
//! arguments bind by name. Nested leaves are named `<name>_<index>` or `<name>_<key>`. Tensor
//! leaves and numeric scalars become graph inputs, while booleans, strings, and `None` are baked
//! into the exported graph and carried by the schema instead.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SchemaError;
use crate::schema::InputSchema;
use crate::tensor::{ArgValue, CallArgs, HostTensor};

/// Per-input map from axis index to its symbolic name.
pub type DynamicAxes = BTreeMap<String, BTreeMap<usize, String>>;

/// One realized graph input of the current call.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedInput {
    pub name: String,
    pub tensor: HostTensor,
}

/// Resolved input naming handed to the exporter and the graph compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct InputInfo {
    pub names: Vec<String>,
    pub require_grad_names: Vec<String>,
    pub shapes: Vec<Vec<usize>>,
    pub dynamic_axes: DynamicAxes,
    pub schema: InputSchema,
}

impl InputInfo {
    pub fn new(inputs: &[NamedInput], schema: InputSchema) -> Self {
        let mut dynamic_axes = DynamicAxes::new();
        for input in inputs {
            let axes = dynamic_axis_names(&input.name, input.tensor.shape().rank());
            if !axes.is_empty() {
                dynamic_axes.insert(input.name.clone(), axes);
            }
        }
        InputInfo {
            names: inputs.iter().map(|input| input.name.clone()).collect(),
            require_grad_names: inputs
                .iter()
                .filter(|input| input.tensor.requires_grad())
                .map(|input| input.name.clone())
                .collect(),
            shapes: inputs
                .iter()
                .map(|input| input.tensor.shape().dims().to_vec())
                .collect(),
            dynamic_axes,
            schema,
        }
    }
}

/// Shape description of one model output, supplied by the host model's output analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub rank: usize,
}

/// Output names plus their dynamic axes, ready to merge into the input axes.
pub fn resolve_outputs(outputs: &[OutputInfo]) -> (Vec<String>, DynamicAxes) {
    let names = outputs.iter().map(|output| output.name.clone()).collect();
    let axes = outputs
        .iter()
        .filter(|output| output.rank > 0)
        .map(|output| {
            (
                output.name.clone(),
                dynamic_axis_names(&output.name, output.rank),
            )
        })
        .collect();
    (names, axes)
}

fn dynamic_axis_names(name: &str, rank: usize) -> BTreeMap<usize, String> {
    (0..rank)
        .map(|axis| (axis, format!("{name}_dim{axis}")))
        .collect()
}

/// Binds call arguments to parameter names and flattens them into graph inputs.
pub fn flatten_call(
    parameter_names: &[String],
    accepts_var_keyword: bool,
    call: &CallArgs,
) -> Result<Vec<NamedInput>, SchemaError> {
    if call.args.len() > parameter_names.len() {
        return Err(SchemaError::TooManyPositional {
            given: call.args.len(),
            declared: parameter_names.len(),
        });
    }
    for name in call.kwargs.keys() {
        match parameter_names.iter().position(|declared| declared == name) {
            Some(index) if index < call.args.len() => {
                return Err(SchemaError::DuplicateArgument(name.clone()))
            }
            Some(_) => {}
            None if accepts_var_keyword => {}
            None => return Err(SchemaError::UnexpectedKeyword(name.clone())),
        }
    }

    let mut inputs = Vec::new();
    for (index, name) in parameter_names.iter().enumerate() {
        let bound = call.args.get(index).or_else(|| call.kwargs.get(name));
        if let Some(value) = bound {
            flatten_value(name, value, &mut inputs);
        }
    }
    for (name, value) in &call.kwargs {
        if !parameter_names.contains(name) {
            flatten_value(name, value, &mut inputs);
        }
    }
    ensure_unique_names(&inputs)?;
    Ok(inputs)
}

fn ensure_unique_names(inputs: &[NamedInput]) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    match inputs.iter().find(|input| !seen.insert(input.name.as_str())) {
        Some(clash) => Err(SchemaError::DuplicateInputName(clash.name.clone())),
        None => Ok(()),
    }
}

fn flatten_value(name: &str, value: &ArgValue, out: &mut Vec<NamedInput>) {
    match value {
        ArgValue::Tensor(tensor) => out.push(NamedInput {
            name: name.to_string(),
            tensor: tensor.clone(),
        }),
        ArgValue::Int(value) => out.push(NamedInput {
            name: name.to_string(),
            tensor: HostTensor::scalar_i64(*value),
        }),
        ArgValue::Float(value) => out.push(NamedInput {
            name: name.to_string(),
            tensor: HostTensor::scalar_f64(*value),
        }),
        ArgValue::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(&format!("{name}_{index}"), item, out);
            }
        }
        ArgValue::Mapping(entries) => {
            for (key, item) in entries {
                flatten_value(&format!("{name}_{key}"), item, out);
            }
        }
        ArgValue::None | ArgValue::Bool(_) | ArgValue::Str(_) => {}
    }
}
