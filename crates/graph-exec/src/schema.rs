//! Structural fingerprints of call arguments.
//!
//! An [`InputSchema`] captures everything about a call that decides whether the previously
//! exported representation is still valid: container nesting, keyword names, and for every
//! tensor leaf its dtype, rank, per-axis extent (or a dynamic marker), and gradient flag.
//! Tensor *values* never enter the schema. Boolean and string arguments are baked into the
//! exported graph as constants, so their values do.
//!
//! Schemas are rebuilt from scratch on every call and compared by value; equality is the sole
//! gate for export-cache hits.

use std::collections::BTreeMap;

use crate::error::SchemaError;
use crate::hashing::hash_value;
use crate::tensor::{ArgValue, CallArgs, DType, HostTensor};

/// Deepest argument nesting accepted before the structure is rejected.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Extent of one tensor axis as seen by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(usize),
    /// Axis marked dynamic by the caller; its extent may vary freely between calls.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorSchema {
    pub dtype: DType,
    pub dims: Vec<Dim>,
    pub requires_grad: bool,
}

impl TensorSchema {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaNode {
    None,
    Bool(bool),
    /// Integer scalars are fed to the graph as rank-0 tensors; only their presence matters.
    Int,
    Float,
    Str(String),
    Tensor(TensorSchema),
    Sequence(Vec<SchemaNode>),
    Mapping(BTreeMap<String, SchemaNode>),
}

impl SchemaNode {
    fn tensor_count(&self) -> usize {
        match self {
            SchemaNode::Tensor(_) => 1,
            SchemaNode::Sequence(items) => items.iter().map(SchemaNode::tensor_count).sum(),
            SchemaNode::Mapping(entries) => entries.values().map(SchemaNode::tensor_count).sum(),
            _ => 0,
        }
    }
}

/// Structural signature of one call's positional and keyword arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputSchema {
    args: Vec<SchemaNode>,
    kwargs: BTreeMap<String, SchemaNode>,
}

impl InputSchema {
    pub fn args(&self) -> &[SchemaNode] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, SchemaNode> {
        &self.kwargs
    }

    pub fn tensor_count(&self) -> usize {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .map(SchemaNode::tensor_count)
            .sum()
    }

    /// Compact 64-bit digest used in logs. Equality checks always compare full schemas.
    pub fn fingerprint(&self) -> u64 {
        hash_value(self)
    }
}

/// Derives the structural signature of a call. Pure and deterministic.
pub fn compute(call: &CallArgs) -> Result<InputSchema, SchemaError> {
    let args = call
        .args
        .iter()
        .enumerate()
        .map(|(index, value)| extract(value, &format!("args[{index}]"), 0))
        .collect::<Result<Vec<_>, _>>()?;
    let mut kwargs = BTreeMap::new();
    for (name, value) in &call.kwargs {
        if name.is_empty() {
            return Err(SchemaError::EmptyKey {
                path: "kwargs".to_string(),
            });
        }
        kwargs.insert(name.clone(), extract(value, name, 0)?);
    }
    Ok(InputSchema { args, kwargs })
}

fn extract(value: &ArgValue, path: &str, depth: usize) -> Result<SchemaNode, SchemaError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(SchemaError::TooDeep {
            path: path.to_string(),
            limit: MAX_NESTING_DEPTH,
        });
    }
    let node = match value {
        ArgValue::None => SchemaNode::None,
        ArgValue::Bool(flag) => SchemaNode::Bool(*flag),
        ArgValue::Int(_) => SchemaNode::Int,
        ArgValue::Float(_) => SchemaNode::Float,
        ArgValue::Str(text) => SchemaNode::Str(text.clone()),
        ArgValue::Tensor(tensor) => SchemaNode::Tensor(tensor_schema(tensor, path)?),
        ArgValue::Sequence(items) => SchemaNode::Sequence(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| extract(item, &format!("{path}[{index}]"), depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        ArgValue::Mapping(entries) => {
            let mut mapped = BTreeMap::new();
            for (key, item) in entries {
                if key.is_empty() {
                    return Err(SchemaError::EmptyKey {
                        path: path.to_string(),
                    });
                }
                mapped.insert(
                    key.clone(),
                    extract(item, &format!("{path}.{key}"), depth + 1)?,
                );
            }
            SchemaNode::Mapping(mapped)
        }
    };
    Ok(node)
}

fn tensor_schema(tensor: &HostTensor, path: &str) -> Result<TensorSchema, SchemaError> {
    let dims = tensor.shape().dims();
    if let Some(&axis) = tensor.dynamic_axes().iter().find(|&&axis| axis >= dims.len()) {
        return Err(SchemaError::DynamicAxisOutOfRange {
            path: path.to_string(),
            axis,
            rank: dims.len(),
        });
    }
    let dims = dims
        .iter()
        .enumerate()
        .map(|(axis, &extent)| {
            if tensor.dynamic_axes().contains(&axis) {
                Dim::Dynamic
            } else {
                Dim::Static(extent)
            }
        })
        .collect();
    Ok(TensorSchema {
        dtype: tensor.dtype(),
        dims,
        requires_grad: tensor.requires_grad(),
    })
}
