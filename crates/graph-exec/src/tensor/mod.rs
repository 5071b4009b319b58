//! Host-side argument values handed to the execution manager on every call.
//!
//! These types describe what the caller passes in: nested argument trees whose tensor leaves
//! carry shape, dtype, device placement, and a gradient flag. The pipeline fingerprints their
//! structure and forwards them untouched to the execution engine.

mod args;
pub mod dtype;
mod host_tensor;
pub mod shape;

pub use args::{ArgValue, CallArgs};
pub use dtype::DType;
pub use host_tensor::{HostTensor, TensorData};
pub use shape::Shape;
