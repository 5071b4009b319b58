//! Host-side tensor values carried by call arguments.
//!
//! The pipeline never computes with tensor payloads. It only reads their structure for
//! schema fingerprinting and, when the sparsity advisor is active, scans integer payloads
//! to measure how many entries differ from a padding sentinel.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::device::Device;

use super::{dtype::DType, shape::Shape};

/// Typed payload of a host tensor. Buffers are reference counted so cloning arguments is cheap.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    /// Raw bits of an `F16` or `BF16` tensor.
    Half(Arc<[u16]>),
    I32(Arc<[i32]>),
    I64(Arc<[i64]>),
    Bool(Arc<[bool]>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
            TensorData::Half(values) => values.len(),
            TensorData::I32(values) => values.len(),
            TensorData::I64(values) => values.len(),
            TensorData::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tensor value passed to the managed model.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Shape,
    dtype: DType,
    data: TensorData,
    requires_grad: bool,
    device: Device,
    dynamic_axes: Vec<usize>,
}

impl HostTensor {
    fn new(shape: Shape, dtype: DType, data: TensorData) -> Result<Self> {
        let Some(expected) = shape.num_elements() else {
            bail!("tensor shape {:?} has more elements than fit in usize", shape.dims());
        };
        if data.len() != expected {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(HostTensor {
            shape,
            dtype,
            data,
            requires_grad: false,
            device: Device::cpu(),
            dynamic_axes: Vec::new(),
        })
    }

    /// Constructs an `F32` tensor, validating the length against the shape.
    pub fn from_f32(shape: Shape, data: Vec<f32>) -> Result<Self> {
        Self::new(shape, DType::F32, TensorData::F32(data.into()))
    }

    pub fn from_f64(shape: Shape, data: Vec<f64>) -> Result<Self> {
        Self::new(shape, DType::F64, TensorData::F64(data.into()))
    }

    /// Constructs a half precision tensor from raw bit patterns.
    pub fn from_half_bits(shape: Shape, dtype: DType, bits: Vec<u16>) -> Result<Self> {
        if !matches!(dtype, DType::F16 | DType::BF16) {
            bail!("half precision payload cannot carry dtype {:?}", dtype);
        }
        Self::new(shape, dtype, TensorData::Half(bits.into()))
    }

    pub fn from_i32(shape: Shape, data: Vec<i32>) -> Result<Self> {
        Self::new(shape, DType::I32, TensorData::I32(data.into()))
    }

    /// Constructs an `I64` tensor, the usual carrier for token ids and labels.
    pub fn from_i64(shape: Shape, data: Vec<i64>) -> Result<Self> {
        Self::new(shape, DType::I64, TensorData::I64(data.into()))
    }

    pub fn from_bool(shape: Shape, data: Vec<bool>) -> Result<Self> {
        Self::new(shape, DType::Bool, TensorData::Bool(data.into()))
    }

    /// Rank-0 `I64` tensor used when an integer argument is fed to the graph.
    pub fn scalar_i64(value: i64) -> Self {
        HostTensor {
            shape: Shape::scalar(),
            dtype: DType::I64,
            data: TensorData::I64(Arc::from(vec![value])),
            requires_grad: false,
            device: Device::cpu(),
            dynamic_axes: Vec::new(),
        }
    }

    /// Rank-0 `F64` tensor used when a float argument is fed to the graph.
    pub fn scalar_f64(value: f64) -> Self {
        HostTensor {
            shape: Shape::scalar(),
            dtype: DType::F64,
            data: TensorData::F64(Arc::from(vec![value])),
            requires_grad: false,
            device: Device::cpu(),
            dynamic_axes: Vec::new(),
        }
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Marks axes whose extent may vary between calls without changing the input schema.
    pub fn with_dynamic_axes(mut self, axes: impl Into<Vec<usize>>) -> Self {
        let mut axes = axes.into();
        axes.sort_unstable();
        axes.dedup();
        self.dynamic_axes = axes;
        self
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dynamic_axes(&self) -> &[usize] {
        &self.dynamic_axes
    }

    /// Counts entries that differ from `sentinel`.
    ///
    /// Returns `None` for non-integer payloads, which cannot hold index or label values.
    pub fn count_not_equal(&self, sentinel: i64) -> Option<usize> {
        match &self.data {
            TensorData::I64(values) => Some(values.iter().filter(|&&v| v != sentinel).count()),
            TensorData::I32(values) => Some(
                values
                    .iter()
                    .filter(|&&v| i64::from(v) != sentinel)
                    .count(),
            ),
            _ => None,
        }
    }
}
