//! Argument trees describing one call of the managed model.

use std::collections::BTreeMap;

use super::host_tensor::HostTensor;

/// One positional or keyword argument, possibly nested inside sequences and mappings.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(HostTensor),
    Sequence(Vec<ArgValue>),
    Mapping(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Returns the first tensor leaf in depth-first order.
    pub fn first_tensor(&self) -> Option<&HostTensor> {
        match self {
            ArgValue::Tensor(tensor) => Some(tensor),
            ArgValue::Sequence(items) => items.iter().find_map(ArgValue::first_tensor),
            ArgValue::Mapping(entries) => entries.values().find_map(ArgValue::first_tensor),
            _ => None,
        }
    }
}

impl From<HostTensor> for ArgValue {
    fn from(tensor: HostTensor) -> Self {
        ArgValue::Tensor(tensor)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(values: Vec<T>) -> Self {
        ArgValue::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// Positional and keyword arguments of a single call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<ArgValue>,
    pub kwargs: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        CallArgs {
            args: values.into_iter().map(Into::into).collect(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Returns the first tensor leaf across positional then keyword arguments.
    pub fn first_tensor(&self) -> Option<&HostTensor> {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .find_map(ArgValue::first_tensor)
    }
}
