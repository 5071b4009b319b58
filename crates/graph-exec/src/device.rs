//! Device placement of the managed model and its inputs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeviceResolutionError;
use crate::tensor::CallArgs;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Rocm,
    /// Device served by a named third-party execution provider.
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: u32,
}

impl Device {
    pub fn cpu() -> Self {
        Device {
            kind: DeviceKind::Cpu,
            index: 0,
        }
    }

    pub fn cuda(index: u32) -> Self {
        Device {
            kind: DeviceKind::Cuda,
            index,
        }
    }

    pub fn rocm(index: u32) -> Self {
        Device {
            kind: DeviceKind::Rocm,
            index,
        }
    }

    pub fn custom(provider: impl Into<String>, index: u32) -> Self {
        Device {
            kind: DeviceKind::Custom(provider.into()),
            index,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.index),
            DeviceKind::Rocm => write!(f, "rocm:{}", self.index),
            DeviceKind::Custom(name) => write!(f, "{}:{}", name, self.index),
        }
    }
}

/// Picks the model's own placement, falling back to the first tensor argument.
pub fn resolve_device(
    model_device: Option<Device>,
    args: &CallArgs,
) -> Result<Device, DeviceResolutionError> {
    model_device
        .or_else(|| args.first_tensor().map(|tensor| tensor.device().clone()))
        .ok_or(DeviceResolutionError)
}
