//! Error types for blockmat

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using blockmat's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blockmat operations
#[derive(Error, Debug)]
pub enum Error {
    /// Operand shapes violate an operation's precondition
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape as (rows, cols)
        expected: (usize, usize),
        /// Actual shape as (rows, cols)
        got: (usize, usize),
    },

    /// A kernel's declared entry sizes or types don't match the operands
    #[error("Operator incompatible with operation '{op}': {reason}")]
    IncompatibleOperator {
        /// The operation name
        op: &'static str,
        /// Why the operator was rejected
        reason: String,
    },

    /// Operation requested for an element type with no registered kernel
    #[error("Unsupported dtype {dtype:?} for operation '{op}'")]
    UnsupportedType {
        /// The unsupported dtype
        dtype: DType,
        /// The operation name
        op: &'static str,
    },

    /// Row operation on a tall block group, or column operation on a wide one
    #[error("Orientation mismatch: '{op}' cannot run on a {orientation} block group")]
    OrientationMismatch {
        /// The operation name
        op: &'static str,
        /// The group orientation that was rejected
        orientation: &'static str,
    },

    /// Slice index or sub-vector bound outside the matrix
    #[error("Index {index} out of range (bound {bound})")]
    IndexOutOfRange {
        /// The offending index
        index: usize,
        /// The exclusive bound
        bound: usize,
    },

    /// Slice index vector is not sorted ascending and unique
    #[error("Slice indices must be ascending and unique")]
    IndexOrder,

    /// Operation requires an external-memory operand
    #[error("Operation '{op}' requires an external-memory operand")]
    EmExpected {
        /// The operation name
        op: &'static str,
    },

    /// Operation requires an in-memory operand
    #[error("Operation '{op}' requires an in-memory operand")]
    ImExpected {
        /// The operation name
        op: &'static str,
    },

    /// Memory allocation failed during resize or materialization
    #[error("Allocation failed: {size} bytes")]
    AllocationFailed {
        /// Requested size in bytes
        size: usize,
    },

    /// External-store portion I/O failure; aborts the enclosing materialization
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sequence arguments have the wrong sign
    #[error("Bad sequence: from={from}, to={to}, by={by}")]
    BadSequence {
        /// Start of the sequence
        from: f64,
        /// End of the sequence
        to: f64,
        /// Step of the sequence
        by: f64,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: (usize, usize), got: (usize, usize)) -> Self {
        Self::ShapeMismatch { expected, got }
    }

    /// Create an incompatible operator error
    pub fn incompatible_operator(op: &'static str, reason: impl Into<String>) -> Self {
        Self::IncompatibleOperator {
            op,
            reason: reason.into(),
        }
    }

    /// Create an index out of range error
    pub fn index_out_of_range(index: usize, bound: usize) -> Self {
        Self::IndexOutOfRange { index, bound }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
