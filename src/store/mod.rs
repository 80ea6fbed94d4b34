//! Matrix backing stores
//!
//! A matrix façade owns an `Arc<dyn MatrixStore>`. Concrete stores keep the
//! elements in memory ([`MemStore`]), striped across NUMA nodes
//! ([`NumaStore`]), or on external storage ([`EmStore`]); [`OneValStore`]
//! synthesizes a constant, [`MapplyStore`] defers a computation, and
//! [`CombinedStore`] presents a block group as one matrix. The unit of I/O
//! and of parallel work is the portion, a rectangular tile served as a
//! [`LocalStore`].

pub mod combined;
pub mod external;
pub mod init;
pub mod local;
pub mod mem;
pub mod numa;
pub mod one_val;
pub mod storage;
pub mod virtual_store;

pub use combined::CombinedStore;
pub use external::{ByteStore, EmStore, FileByteStore, MemByteStore};
pub use init::{ConstFill, RandInit, SeqInit};
pub use local::LocalStore;
pub use mem::MemStore;
pub use numa::{NumaStore, NumaTopology};
pub use one_val::OneValStore;
pub use storage::Storage;
pub use virtual_store::{MapplyStore, MaterializeLevel, PortionMapplyOp, VirtualStore};

use crate::dtype::DType;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Physical element order of a store
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Row-major contiguous
    Row,
    /// Column-major contiguous
    Col,
}

impl Layout {
    /// The opposite layout
    #[inline]
    pub const fn flip(self) -> Self {
        match self {
            Self::Row => Self::Col,
            Self::Col => Self::Row,
        }
    }
}

/// Portion initializer invoked by `set_data`
///
/// `set` receives one contiguous run of `n` elements; `row_idx`/`col_idx`
/// are the global coordinates of `dest[0]`. Implementations must be
/// re-entrant: runs are initialized concurrently.
pub trait SetOperate: Send + Sync {
    /// The dtype this initializer writes
    fn dtype(&self) -> DType;

    /// Fill `dest` with `n` elements starting at global `(row_idx, col_idx)`
    fn set(&self, dest: &mut [u8], n: usize, row_idx: usize, col_idx: usize);
}

/// Shared contract of every matrix backing store
pub trait MatrixStore: Send + Sync {
    /// Number of rows
    fn num_rows(&self) -> usize;

    /// Number of columns
    fn num_cols(&self) -> usize;

    /// Element type
    fn dtype(&self) -> DType;

    /// Physical element order
    fn store_layout(&self) -> Layout;

    /// Whether the elements are resident in memory
    fn is_in_mem(&self) -> bool;

    /// Whether this store defers a computation
    fn is_virtual(&self) -> bool {
        false
    }

    /// Extract the portion covering `num_rows x num_cols` at
    /// `(start_row, start_col)`
    ///
    /// May load from external storage. Fails with `IndexOutOfRange` when the
    /// requested rectangle leaves the matrix.
    fn get_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore>;

    /// Copy a portion into this store at `(dest_row, dest_col)`
    ///
    /// Writes to the same store are observable to later reads of the same
    /// region; no ordering holds across stores.
    fn write_portion(&self, portion: &LocalStore, dest_row: usize, dest_col: usize) -> Result<()>;

    /// The transposed view of this store
    ///
    /// Swaps shape and logical layout; in-memory stores share the backing
    /// buffer instead of copying.
    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore>;

    /// Run an initializer over every portion of the store
    fn set_data(&self, _op: &dyn SetOperate) -> Result<()> {
        Err(Error::internal("store is read-only"))
    }

    /// Hint whether portions should be retained after a read
    ///
    /// Only external stores honor it; everyone else ignores the hint.
    fn set_cache_portion(&self, _cache: bool) {}

    /// Downcast to the lazy-store interface
    fn as_virtual(&self) -> Option<&dyn VirtualStore> {
        None
    }

    /// Downcast to the block-group interface
    fn as_combined(&self) -> Option<&CombinedStore> {
        None
    }

    /// Short description used in diagnostics and lazy-node names
    fn name(&self) -> String;
}

/// True when the shape counts as wide (`ncol >= nrow`)
#[inline]
pub(crate) fn is_wide_shape(nrow: usize, ncol: usize) -> bool {
    ncol >= nrow
}

/// Validate a portion rectangle against a store shape
pub(crate) fn check_portion_bounds(
    store_rows: usize,
    store_cols: usize,
    start_row: usize,
    start_col: usize,
    num_rows: usize,
    num_cols: usize,
) -> Result<()> {
    if num_rows == 0 || num_cols == 0 {
        return Err(Error::internal("empty portion request"));
    }
    let end_row = start_row
        .checked_add(num_rows)
        .ok_or(Error::index_out_of_range(start_row, store_rows))?;
    if end_row > store_rows {
        return Err(Error::index_out_of_range(end_row - 1, store_rows));
    }
    let end_col = start_col
        .checked_add(num_cols)
        .ok_or(Error::index_out_of_range(start_col, store_cols))?;
    if end_col > store_cols {
        return Err(Error::index_out_of_range(end_col - 1, store_cols));
    }
    Ok(())
}

/// Initializer wrapper shifting global coordinates by a member offset
pub(crate) struct OffsetSetOperate<'a> {
    pub inner: &'a dyn SetOperate,
    pub row_off: usize,
    pub col_off: usize,
}

impl SetOperate for OffsetSetOperate<'_> {
    fn dtype(&self) -> DType {
        self.inner.dtype()
    }

    fn set(&self, dest: &mut [u8], n: usize, row_idx: usize, col_idx: usize) {
        self.inner
            .set(dest, n, row_idx + self.row_off, col_idx + self.col_off)
    }
}
