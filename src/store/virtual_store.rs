//! Virtual matrix stores: deferred computation nodes
//!
//! A [`MapplyStore`] records a portion operator over input stores. Nothing
//! is computed until a portion is requested or the store is materialized;
//! trees of virtual stores evaluate portion-wise, inner nodes feeding outer
//! ones without buffering the full intermediate.

use super::local::LocalStore;
use super::{check_portion_bounds, Layout, MatrixStore};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::scheduler;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

type InputList = SmallVec<[Arc<dyn MatrixStore>; 2]>;

/// How far a virtual store materializes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MaterializeLevel {
    /// Produce a fully materialized backing store on first use
    Full,
    /// Compute portions on demand; retain nothing but the returned portion
    Part,
}

/// The core lazy-operator abstraction
///
/// Given `k` input local stores of identical shape (modulo a broadcast
/// dimension), produce one output local store.
pub trait PortionMapplyOp: Send + Sync {
    /// Rows of the full output
    fn out_num_rows(&self) -> usize;

    /// Columns of the full output
    fn out_num_cols(&self) -> usize;

    /// Output element type
    fn out_dtype(&self) -> DType;

    /// Whether this op reduces its inputs (affects caching policy)
    fn is_agg(&self) -> bool {
        false
    }

    /// Compute one output portion from aligned input portions
    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()>;

    /// The equivalent op for transposed inputs
    fn transpose(&self) -> Arc<dyn PortionMapplyOp>;

    /// Human-readable node name, e.g. `(mat1+mat2)`
    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String;
}

/// Interface of stores that defer a computation
pub trait VirtualStore: MatrixStore {
    /// Compute the full result, memoizing it inside the store
    fn materialize(&self) -> Result<Arc<dyn MatrixStore>>;

    /// Change the materialize level
    fn set_materialize_level(&self, level: MaterializeLevel);

    /// The current materialize level
    fn materialize_level(&self) -> MaterializeLevel;
}

/// Request the input portion aligned with an output portion
///
/// Inputs whose dimension matches the output dimension are sliced with the
/// same range; a dimension that differs (a broadcast vector, or the inner
/// dimension of a product) is requested in full.
pub(crate) fn aligned_portion(
    input: &Arc<dyn MatrixStore>,
    out_rows: usize,
    out_cols: usize,
    start_row: usize,
    start_col: usize,
    num_rows: usize,
    num_cols: usize,
) -> Result<LocalStore> {
    let (r0, nr) = if input.num_rows() == out_rows {
        (start_row, num_rows)
    } else {
        (0, input.num_rows())
    };
    let (c0, nc) = if input.num_cols() == out_cols {
        (start_col, num_cols)
    } else {
        (0, input.num_cols())
    };
    input.get_portion(r0, c0, nr, nc)
}

/// A lazy node: an operator over input stores
pub struct MapplyStore {
    inputs: InputList,
    op: Arc<dyn PortionMapplyOp>,
    layout: Layout,
    level: Mutex<MaterializeLevel>,
    buf: Mutex<Option<Arc<dyn MatrixStore>>>,
}

impl MapplyStore {
    /// Defer `op` over `inputs`, declaring the output layout
    pub fn new(
        inputs: Vec<Arc<dyn MatrixStore>>,
        op: Arc<dyn PortionMapplyOp>,
        layout: Layout,
    ) -> Result<Arc<Self>> {
        if inputs.is_empty() {
            return Err(Error::internal("lazy node needs at least one input"));
        }
        Ok(Arc::new(Self {
            inputs: inputs.into(),
            op,
            layout,
            level: Mutex::new(MaterializeLevel::Part),
            buf: Mutex::new(None),
        }))
    }

    /// The input stores
    pub fn inputs(&self) -> &[Arc<dyn MatrixStore>] {
        &self.inputs
    }

    /// The portion operator
    pub fn op(&self) -> &Arc<dyn PortionMapplyOp> {
        &self.op
    }

    fn compute_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        let (out_rows, out_cols) = (self.op.out_num_rows(), self.op.out_num_cols());
        let ins: Vec<LocalStore> = self
            .inputs
            .iter()
            .map(|input| {
                aligned_portion(
                    input, out_rows, out_cols, start_row, start_col, num_rows, num_cols,
                )
            })
            .collect::<Result<_>>()?;
        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.op.out_dtype(),
        )?;
        self.op.run(&ins, &mut out)?;
        Ok(out)
    }
}

impl MatrixStore for MapplyStore {
    fn num_rows(&self) -> usize {
        self.op.out_num_rows()
    }

    fn num_cols(&self) -> usize {
        self.op.out_num_cols()
    }

    fn dtype(&self) -> DType {
        self.op.out_dtype()
    }

    fn store_layout(&self) -> Layout {
        self.layout
    }

    fn is_in_mem(&self) -> bool {
        self.inputs.iter().all(|m| m.is_in_mem())
    }

    fn is_virtual(&self) -> bool {
        true
    }

    fn get_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        check_portion_bounds(
            self.num_rows(),
            self.num_cols(),
            start_row,
            start_col,
            num_rows,
            num_cols,
        )?;
        if let Some(buf) = self.buf.lock().as_ref() {
            return buf.get_portion(start_row, start_col, num_rows, num_cols);
        }
        if *self.level.lock() == MaterializeLevel::Full {
            let buf = self.materialize()?;
            return buf.get_portion(start_row, start_col, num_rows, num_cols);
        }
        self.compute_portion(start_row, start_col, num_rows, num_cols)
    }

    fn write_portion(&self, _portion: &LocalStore, _dest_row: usize, _dest_col: usize) -> Result<()> {
        Err(Error::internal("lazy store is read-only"))
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        let inputs: InputList = self
            .inputs
            .iter()
            .map(|m| Arc::clone(m).transpose())
            .collect();
        let buf = self
            .buf
            .lock()
            .as_ref()
            .map(|b| Arc::clone(b).transpose());
        Arc::new(MapplyStore {
            inputs,
            op: self.op.transpose(),
            layout: self.layout.flip(),
            level: Mutex::new(*self.level.lock()),
            buf: Mutex::new(buf),
        })
    }

    fn set_cache_portion(&self, cache: bool) {
        for input in &self.inputs {
            input.set_cache_portion(cache);
        }
    }

    fn as_virtual(&self) -> Option<&dyn VirtualStore> {
        Some(self)
    }

    fn name(&self) -> String {
        self.op.name(&self.inputs)
    }
}

impl VirtualStore for MapplyStore {
    fn materialize(&self) -> Result<Arc<dyn MatrixStore>> {
        if let Some(buf) = self.buf.lock().as_ref() {
            return Ok(Arc::clone(buf));
        }
        let res = scheduler::mapply_portions(&self.inputs, Arc::clone(&self.op), self.layout, true)?;
        *self.buf.lock() = Some(Arc::clone(&res));
        Ok(res)
    }

    fn set_materialize_level(&self, level: MaterializeLevel) {
        *self.level.lock() = level;
    }

    fn materialize_level(&self) -> MaterializeLevel {
        *self.level.lock()
    }
}
