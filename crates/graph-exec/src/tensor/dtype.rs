//! Enumerates the scalar element types that may appear in call arguments.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier recorded in input schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 16-bit bfloat16 precision as used by many accelerators.
    BF16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer, the usual carrier for token ids and labels.
    I64,
    /// Boolean masks.
    Bool,
}
