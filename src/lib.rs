//! # blockmat
//!
//! **A lazily-evaluated, block-partitioned dense matrix engine.**
//!
//! blockmat stores large matrices as groups of fixed-width blocks laid out
//! along the long axis, builds arithmetic as a DAG of virtual stores, and
//! materializes results portion by portion - in memory, striped across NUMA
//! nodes, or streamed from external storage.
//!
//! ## Why blockmat?
//!
//! - **Lazy by default**: operations record operator nodes; nothing runs
//!   until a result is needed
//! - **Portion-wise execution**: one scheduler drives cache-sized tiles,
//!   parallelism, and external-memory streaming
//! - **Shape-aware products**: tall and wide matrices take different inner
//!   product algorithms, chosen automatically
//! - **Runtime-typed elements**: one type-erased API over monomorphized
//!   kernels, dispatched once per portion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blockmat::prelude::*;
//!
//! let a = DenseMatrix::from_slice(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row)?;
//! let b = DenseMatrix::from_slice(&[5.0, 6.0, 7.0, 8.0], 2, 2, Layout::Row)?;
//!
//! let mut c = a.multiply(&b, None)?;   // lazy
//! c.materialize_self()?;               // compute and memoize
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod ops;
pub mod scheduler;
pub mod store;
pub mod vector;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{config, init, EngineConfig};
    pub use crate::dtype::{DType, Scalar};
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{AggOperate, BinaryOp, BulkOperate, BulkUnary, UnaryOp};
    pub use crate::matrix::{create_matrix, BlockMatrix, DenseMatrix, Margin};
    pub use crate::store::{
        ByteStore, CombinedStore, ConstFill, EmStore, FileByteStore, Layout, MatrixStore,
        MemByteStore, MemStore, NumaTopology, RandInit, SeqInit,
    };
    pub use crate::store::{MaterializeLevel, VirtualStore};
    pub use crate::vector::{AggGroupApply, CountGroupApply, GroupApply, GroupBy, Vector};
}
