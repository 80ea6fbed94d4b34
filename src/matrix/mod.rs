//! Dense matrix façade
//!
//! [`DenseMatrix`] is the public shape-aware surface. Arithmetic operations
//! construct lazy stores and return new matrices; nothing mutates the
//! receiver except [`DenseMatrix::materialize_self`] and
//! [`DenseMatrix::assign`], which rebind the backing store and need external
//! synchronization when shared across threads.

pub mod block;
pub(crate) mod inner_prod;

pub use block::BlockMatrix;

use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::kernel::{BinaryOp, BulkOperate, BulkUnary, UnaryOp};
use crate::ops::{Mapply2Op, MapplyColsOp, MapplyRowsOp, SapplyOp};
use crate::scheduler;
use crate::store::virtual_store::MaterializeLevel;
use crate::store::{
    ByteStore, ConstFill, EmStore, Layout, LocalStore, MapplyStore, MatrixStore, MemStore,
    NumaStore, NumaTopology, OneValStore, RandInit, SetOperate,
};
use crate::vector::Vector;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::warn;

/// Axis an [`ArrApply`] operator runs along
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Margin {
    /// Apply to each row
    Row,
    /// Apply to each column
    Col,
}

/// Operator applied to whole rows or columns by [`DenseMatrix::apply`]
pub trait ArrApply: Send + Sync {
    /// Element type of the produced arrays
    fn output_dtype(&self) -> DType;

    /// Output length for an input of `in_len` elements
    fn num_out_elems(&self, in_len: usize) -> usize;

    /// Map one input array to one output array
    fn run(&self, input: &[u8], out: &mut [u8]);
}

/// A dense matrix: shared ownership of a backing store
#[derive(Clone)]
pub struct DenseMatrix {
    store: Arc<dyn MatrixStore>,
}

impl DenseMatrix {
    /// Wrap an existing store
    pub fn from_store(store: Arc<dyn MatrixStore>) -> Self {
        Self { store }
    }

    /// Create an in-memory matrix initialized by `init`
    pub fn new(
        nrow: usize,
        ncol: usize,
        layout: Layout,
        init: &dyn SetOperate,
    ) -> Result<Self> {
        let store = MemStore::new(nrow, ncol, layout, init.dtype())?;
        store.set_data(init)?;
        Ok(Self::from_store(store))
    }

    /// Create a NUMA-striped matrix initialized by `init`
    pub fn new_numa(
        nrow: usize,
        ncol: usize,
        layout: Layout,
        init: &dyn SetOperate,
        topology: NumaTopology,
    ) -> Result<Self> {
        let store = NumaStore::new(nrow, ncol, layout, init.dtype(), topology)?;
        store.set_data(init)?;
        Ok(Self::from_store(store))
    }

    /// Create an external-memory matrix initialized by `init`
    pub fn new_external(
        nrow: usize,
        ncol: usize,
        layout: Layout,
        init: &dyn SetOperate,
        bytes: Arc<dyn ByteStore>,
    ) -> Result<Self> {
        let store = EmStore::new(bytes, nrow, ncol, layout, init.dtype())?;
        store.set_data(init)?;
        Ok(Self::from_store(store))
    }

    /// A constant matrix backed by a single scalar
    pub fn constant(nrow: usize, ncol: usize, layout: Layout, value: Scalar) -> Self {
        Self::from_store(OneValStore::new(value, nrow, ncol, layout))
    }

    /// A uniformly random matrix over `[min, max)`
    pub fn random(
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
        min: f64,
        max: f64,
        seed: u64,
    ) -> Result<Self> {
        Self::new(nrow, ncol, layout, &RandInit::new(dtype, min, max, seed)?)
    }

    /// Build a matrix from a typed slice in the given layout order
    pub fn from_slice<T: crate::dtype::Element>(
        data: &[T],
        nrow: usize,
        ncol: usize,
        layout: Layout,
    ) -> Result<Self> {
        Ok(Self::from_store(MemStore::from_slice(
            data, nrow, ncol, layout,
        )?))
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.store.num_rows()
    }

    /// Number of columns
    pub fn num_cols(&self) -> usize {
        self.store.num_cols()
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.store.dtype()
    }

    /// Physical element order of the backing store
    pub fn store_layout(&self) -> Layout {
        self.store.store_layout()
    }

    /// Whether `ncol >= nrow`
    pub fn is_wide(&self) -> bool {
        self.num_cols() >= self.num_rows()
    }

    /// Whether the matrix has one row or one column
    pub fn is_vector(&self) -> bool {
        self.num_rows() == 1 || self.num_cols() == 1
    }

    /// Whether the backing store defers a computation
    pub fn is_virtual(&self) -> bool {
        self.store.is_virtual()
    }

    /// Whether the elements are resident in memory
    pub fn is_in_mem(&self) -> bool {
        self.store.is_in_mem()
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn MatrixStore> {
        &self.store
    }

    /// Run an initializer over the backing store
    ///
    /// Requires external synchronization when the matrix is shared.
    pub fn set_data(&self, init: &dyn SetOperate) -> Result<()> {
        self.store.set_data(init)
    }

    // ------------------------------------------------------------------
    // Precondition checks
    // ------------------------------------------------------------------

    pub(crate) fn verify_inner_prod(
        &self,
        other: &DenseMatrix,
        left_op: &BulkOperate,
        right_op: &BulkOperate,
    ) -> Result<()> {
        if self.dtype().size_in_bytes() != left_op.left_entry_size()
            || other.dtype().size_in_bytes() != left_op.right_entry_size()
        {
            warn!("the left operator isn't compatible with the input matrices");
            return Err(Error::incompatible_operator(
                "inner_prod",
                "left operator entry sizes don't match the operands",
            ));
        }
        if left_op.output_entry_size() != right_op.left_entry_size() {
            warn!("the type of the left operator doesn't match the right operator");
            return Err(Error::incompatible_operator(
                "inner_prod",
                "left operator output doesn't feed the right operator",
            ));
        }
        if right_op.left_entry_size() != right_op.right_entry_size()
            || right_op.left_entry_size() != right_op.output_entry_size()
        {
            warn!("the input and output of the right operator have different types");
            return Err(Error::incompatible_operator(
                "inner_prod",
                "right operator must be size-preserving",
            ));
        }
        if self.num_cols() != other.num_rows() {
            warn!("the matrix sizes don't match");
            return Err(Error::shape_mismatch(
                (self.num_cols(), other.num_rows()),
                (other.num_rows(), other.num_cols()),
            ));
        }
        Ok(())
    }

    fn verify_aggregate(&self, op: &BulkOperate) -> Result<()> {
        if op.left_entry_size() != op.right_entry_size()
            || op.left_entry_size() != op.output_entry_size()
        {
            warn!("the input and output types of the aggregation operator differ");
            return Err(Error::incompatible_operator(
                "aggregate",
                "operator must be size-preserving",
            ));
        }
        if self.dtype().size_in_bytes() != op.left_entry_size() {
            warn!("the matrix entry size differs from the operator");
            return Err(Error::incompatible_operator(
                "aggregate",
                "operator entry size doesn't match the matrix",
            ));
        }
        Ok(())
    }

    fn verify_mapply2(&self, other: &DenseMatrix, op: &BulkOperate) -> Result<()> {
        if self.num_rows() != other.num_rows() || self.num_cols() != other.num_cols() {
            warn!("the two matrices in mapply2 don't have the same shape");
            return Err(Error::shape_mismatch(
                (self.num_rows(), self.num_cols()),
                (other.num_rows(), other.num_cols()),
            ));
        }
        if self.dtype().size_in_bytes() != op.left_entry_size()
            || other.dtype().size_in_bytes() != op.right_entry_size()
        {
            warn!("the element types aren't compatible with the operator");
            return Err(Error::incompatible_operator(
                "mapply2",
                "operator entry sizes don't match the operands",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    /// Generalized matrix product: scalar multiply is `left_op`, scalar add
    /// is `right_op`
    ///
    /// The right operator must be size-preserving and, for integer kernels,
    /// associative; the contraction is evaluated block-wise.
    pub fn inner_prod(
        &self,
        other: &DenseMatrix,
        left_op: BulkOperate,
        right_op: BulkOperate,
        out_layout: Option<Layout>,
    ) -> Result<DenseMatrix> {
        self.verify_inner_prod(other, &left_op, &right_op)?;
        inner_prod::inner_prod(self, other, left_op, right_op, out_layout)
    }

    /// Matrix multiplication
    ///
    /// Floating element types take the accelerated kernel path, equivalent
    /// to `inner_prod` with MUL and ADD; other types use the generic inner
    /// product with the dtype's basic ops.
    pub fn multiply(&self, other: &DenseMatrix, out_layout: Option<Layout>) -> Result<DenseMatrix> {
        let left_op = BulkOperate::new(self.dtype(), other.dtype(), BinaryOp::Mul);
        let right_op = BulkOperate::same(left_op.output_dtype(), BinaryOp::Add);
        self.inner_prod(other, left_op, right_op, out_layout)
    }

    /// Element-wise binary operation over two same-shaped matrices
    pub fn mapply2(&self, other: &DenseMatrix, op: BulkOperate) -> Result<DenseMatrix> {
        self.verify_mapply2(other, &op)?;
        let node = MapplyStore::new(
            vec![Arc::clone(&self.store), Arc::clone(&other.store)],
            Mapply2Op::new(op, self.num_rows(), self.num_cols()),
            self.store_layout(),
        )?;
        Ok(Self::from_store(node))
    }

    /// Unary kernel applied per element
    pub fn sapply(&self, op: BulkUnary) -> Result<DenseMatrix> {
        if op.dtype() != self.dtype() {
            warn!("the unary operator doesn't match the matrix element type");
            return Err(Error::incompatible_operator(
                "sapply",
                "operator dtype doesn't match the matrix",
            ));
        }
        let node = MapplyStore::new(
            vec![Arc::clone(&self.store)],
            SapplyOp::new(op, self.num_rows(), self.num_cols()),
            self.store_layout(),
        )?;
        Ok(Self::from_store(node))
    }

    /// Broadcast `vec` over every row: `out[i,j] = op(a[i,j], vec[j])`
    pub fn mapply_rows(&self, vec: &Vector, op: BulkOperate) -> Result<DenseMatrix> {
        if vec.len() != self.num_cols() {
            warn!("the vector's length needs to equal the number of columns");
            return Err(Error::shape_mismatch(
                (1, self.num_cols()),
                (1, vec.len()),
            ));
        }
        if self.dtype().size_in_bytes() != op.left_entry_size()
            || vec.dtype().size_in_bytes() != op.right_entry_size()
        {
            return Err(Error::incompatible_operator(
                "mapply_rows",
                "operator entry sizes don't match the operands",
            ));
        }
        let node = MapplyStore::new(
            vec![Arc::clone(&self.store), vec.to_row_store()?],
            MapplyRowsOp::new(op, self.num_rows(), self.num_cols()),
            self.store_layout(),
        )?;
        Ok(Self::from_store(node))
    }

    /// Broadcast `vec` over every column: `out[i,j] = op(a[i,j], vec[i])`
    pub fn mapply_cols(&self, vec: &Vector, op: BulkOperate) -> Result<DenseMatrix> {
        if vec.len() != self.num_rows() {
            warn!("the vector's length needs to equal the number of rows");
            return Err(Error::shape_mismatch(
                (self.num_rows(), 1),
                (vec.len(), 1),
            ));
        }
        if self.dtype().size_in_bytes() != op.left_entry_size()
            || vec.dtype().size_in_bytes() != op.right_entry_size()
        {
            return Err(Error::incompatible_operator(
                "mapply_cols",
                "operator entry sizes don't match the operands",
            ));
        }
        let node = MapplyStore::new(
            vec![Arc::clone(&self.store), vec.to_col_store()?],
            MapplyColsOp::new(op, self.num_rows(), self.num_cols()),
            self.store_layout(),
        )?;
        Ok(Self::from_store(node))
    }

    /// The transposed matrix (zero-copy for in-memory stores)
    pub fn transpose(&self) -> DenseMatrix {
        Self::from_store(Arc::clone(&self.store).transpose())
    }

    /// Reduce the whole matrix to one scalar with a binary fold
    pub fn aggregate(&self, op: BulkOperate) -> Result<Scalar> {
        self.verify_aggregate(&op)?;
        scheduler::aggregate_store(&self.store, op)
    }

    /// Sum of all elements
    pub fn sum(&self) -> Result<Scalar> {
        self.aggregate(BulkOperate::same(self.dtype(), BinaryOp::Add))
    }

    /// Frobenius norm, computed through the kernel table
    pub fn norm2(&self) -> Result<f64> {
        let sq = self.mapply2(self, BulkOperate::same(self.dtype(), BinaryOp::Mul))?;
        let sum = sq.aggregate(BulkOperate::same(sq.dtype(), BinaryOp::Add))?;
        let sqrt = BulkUnary::new(sum.dtype(), UnaryOp::Sqrt);
        let mut out = [0u8; 8];
        let size = sum.dtype().size_in_bytes();
        sqrt.run_a(1, sum.as_bytes(), &mut out[..size]);
        Ok(Scalar::from_bytes(sum.dtype(), &out[..size]).to_f64())
    }

    /// Reshape to `(nrow, ncol)`, preserving the total element count
    ///
    /// Elements are consumed in column-major order, or row-major when
    /// `byrow` is set, and written to the new shape in the same order.
    pub fn conv2(&self, nrow: usize, ncol: usize, byrow: bool) -> Result<DenseMatrix> {
        if nrow * ncol != self.num_rows() * self.num_cols() {
            warn!("conv2 must preserve the total number of elements");
            return Err(Error::shape_mismatch(
                (self.num_rows(), self.num_cols()),
                (nrow, ncol),
            ));
        }
        let src = self
            .store
            .get_portion(0, 0, self.num_rows(), self.num_cols())?;
        let layout = self.store_layout();
        let mut out = LocalStore::new_owned(0, 0, nrow, ncol, layout, self.dtype())?;
        let (sr, sc) = (src.num_rows(), src.num_cols());
        for idx in 0..nrow * ncol {
            let (si, sj, di, dj) = if byrow {
                (idx / sc, idx % sc, idx / ncol, idx % ncol)
            } else {
                (idx % sr, idx / sr, idx % nrow, idx / nrow)
            };
            out.set_scalar(di, dj, src.get_scalar(si, sj));
        }
        Ok(Self::from_store(MemStore::from_portion(&out)?))
    }

    /// Apply an array operator to every row or column
    pub fn apply(&self, margin: Margin, op: &dyn ArrApply) -> Result<DenseMatrix> {
        let (lines, in_len, line_layout) = match margin {
            Margin::Row => (self.num_rows(), self.num_cols(), Layout::Row),
            Margin::Col => (self.num_cols(), self.num_rows(), Layout::Col),
        };
        let out_len = op.num_out_elems(in_len);
        let out = match margin {
            Margin::Row => MemStore::new(lines, out_len, Layout::Row, op.output_dtype())?,
            Margin::Col => MemStore::new(out_len, lines, Layout::Col, op.output_dtype())?,
        };
        let osize = op.output_dtype().size_in_bytes();
        let run_line = |i: usize| -> Result<()> {
            let portion = match margin {
                Margin::Row => self.store.get_portion(i, 0, 1, in_len)?,
                Margin::Col => self.store.get_portion(0, i, in_len, 1)?,
            };
            let input = if portion.layout() == line_layout {
                portion
            } else {
                portion.to_layout(line_layout)?
            };
            let mut line = vec![0u8; out_len * osize];
            op.run(input.as_bytes(), &mut line);
            let out_local = LocalStore::from_storage(
                crate::store::Storage::from_bytes(&line)?,
                0,
                0,
                0,
                if margin == Margin::Row { 1 } else { out_len },
                if margin == Margin::Row { out_len } else { 1 },
                line_layout,
                op.output_dtype(),
            );
            match margin {
                Margin::Row => out.write_portion(&out_local, i, 0),
                Margin::Col => out.write_portion(&out_local, 0, i),
            }
        };
        if lines > 1 {
            scheduler::pool().install(|| (0..lines).into_par_iter().try_for_each(run_line))?;
        } else {
            (0..lines).try_for_each(run_line)?;
        }
        Ok(Self::from_store(out))
    }

    // ------------------------------------------------------------------
    // Slicing
    // ------------------------------------------------------------------

    fn check_slice_indices(&self, idxs: &[usize], bound: usize, op: &'static str) -> Result<()> {
        if idxs.is_empty() {
            return Err(Error::incompatible_operator(op, "no indices given"));
        }
        for &idx in idxs {
            if idx >= bound {
                warn!("the {} index is out of bound", op);
                return Err(Error::index_out_of_range(idx, bound));
            }
        }
        if !idxs.windows(2).all(|w| w[0] < w[1]) {
            warn!("{}: the indices must be in ascending order", op);
            return Err(Error::IndexOrder);
        }
        Ok(())
    }

    /// Column `idx` as a vector
    ///
    /// Requires a column-major backing store; the view shares storage when
    /// the store is contiguous in memory.
    pub fn get_col(&self, idx: usize) -> Result<Vector> {
        if idx >= self.num_cols() {
            warn!("the col index is out of bound");
            return Err(Error::index_out_of_range(idx, self.num_cols()));
        }
        if self.store_layout() != Layout::Col {
            warn!("can't extract a column from a row-major store");
            return Err(Error::incompatible_operator(
                "get_col",
                "requires a column-major layout",
            ));
        }
        let portion = self.store.get_portion(0, idx, self.num_rows(), 1)?;
        Vector::from_local(&portion)
    }

    /// Row `idx` as a vector
    pub fn get_row(&self, idx: usize) -> Result<Vector> {
        if idx >= self.num_rows() {
            warn!("the row index is out of bound");
            return Err(Error::index_out_of_range(idx, self.num_rows()));
        }
        if self.store_layout() != Layout::Row {
            warn!("can't extract a row from a column-major store");
            return Err(Error::incompatible_operator(
                "get_row",
                "requires a row-major layout",
            ));
        }
        let portion = self.store.get_portion(idx, 0, 1, self.num_cols())?;
        Vector::from_local(&portion)
    }

    /// The columns selected by `idxs` (ascending, unique)
    pub fn get_cols(&self, idxs: &[usize]) -> Result<DenseMatrix> {
        self.check_slice_indices(idxs, self.num_cols(), "get_cols")?;
        if self.store_layout() != Layout::Col {
            warn!("can't slice columns of a row-major store");
            return Err(Error::incompatible_operator(
                "get_cols",
                "requires a column-major layout",
            ));
        }
        let out = MemStore::new(self.num_rows(), idxs.len(), Layout::Col, self.dtype())?;
        for (k, &idx) in idxs.iter().enumerate() {
            let col = self.store.get_portion(0, idx, self.num_rows(), 1)?;
            out.write_portion(&col, 0, k)?;
        }
        Ok(Self::from_store(out))
    }

    /// The rows selected by `idxs` (ascending, unique)
    pub fn get_rows(&self, idxs: &[usize]) -> Result<DenseMatrix> {
        self.check_slice_indices(idxs, self.num_rows(), "get_rows")?;
        if self.store_layout() != Layout::Row {
            warn!("can't slice rows of a column-major store");
            return Err(Error::incompatible_operator(
                "get_rows",
                "requires a row-major layout",
            ));
        }
        let out = MemStore::new(idxs.len(), self.num_cols(), Layout::Row, self.dtype())?;
        for (k, &idx) in idxs.iter().enumerate() {
            let row = self.store.get_portion(idx, 0, 1, self.num_cols())?;
            out.write_portion(&row, k, 0)?;
        }
        Ok(Self::from_store(out))
    }

    // ------------------------------------------------------------------
    // Materialization and store management
    // ------------------------------------------------------------------

    /// Compute any deferred result and rebind the store to it
    ///
    /// Idempotent: a concrete store is left untouched.
    pub fn materialize_self(&mut self) -> Result<()> {
        if !self.store.is_virtual() {
            return Ok(());
        }
        let replacement: Arc<dyn MatrixStore> = if let Some(v) = self.store.as_virtual() {
            v.materialize()?
        } else if let Some(combined) = self.store.as_combined() {
            let members = scheduler::co_materialize(combined.members(), true)?;
            combined.with_members(members)?
        } else {
            return Ok(());
        };
        self.store = replacement;
        Ok(())
    }

    /// Change the materialize level of a deferred store (no-op otherwise)
    pub fn set_materialize_level(&self, level: MaterializeLevel) {
        if let Some(v) = self.store.as_virtual() {
            v.set_materialize_level(level);
        } else if let Some(combined) = self.store.as_combined() {
            for m in combined.members() {
                if let Some(v) = m.as_virtual() {
                    v.set_materialize_level(level);
                }
            }
        }
    }

    /// Rebind this matrix to share `other`'s store
    pub fn assign(&mut self, other: &DenseMatrix) {
        self.store = Arc::clone(&other.store);
    }

    /// A copy of this matrix resident in memory
    ///
    /// In-memory matrices pass through unchanged; external and virtual ones
    /// are read portion-wise into a fresh store.
    pub fn conv_to_mem(&self) -> Result<DenseMatrix> {
        if self.store.is_in_mem() && !self.store.is_virtual() {
            return Ok(self.clone());
        }
        let out = MemStore::new(
            self.num_rows(),
            self.num_cols(),
            self.store_layout(),
            self.dtype(),
        )?;
        for (r0, c0, nr, nc) in scheduler::portion_tiles(self.num_rows(), self.num_cols()) {
            let p = self.store.get_portion(r0, c0, nr, nc)?;
            out.write_portion(&p, r0, c0)?;
        }
        Ok(Self::from_store(out))
    }

    /// A copy of this matrix resident on external storage
    pub fn conv_to_external(&self, bytes: Arc<dyn ByteStore>) -> Result<DenseMatrix> {
        let out = EmStore::new(
            bytes,
            self.num_rows(),
            self.num_cols(),
            self.store_layout(),
            self.dtype(),
        )?;
        for (r0, c0, nr, nc) in scheduler::portion_tiles(self.num_rows(), self.num_cols()) {
            let p = self.store.get_portion(r0, c0, nr, nc)?;
            out.write_portion(&p, r0, c0)?;
        }
        Ok(Self::from_store(out))
    }

    // ------------------------------------------------------------------
    // Element access
    // ------------------------------------------------------------------

    /// Element `(i, j)` widened to f64
    pub fn get_f64(&self, i: usize, j: usize) -> Result<f64> {
        let p = self.store.get_portion(i, j, 1, 1)?;
        Ok(p.get_f64(0, 0))
    }

    /// All elements in row-major order, widened to f64
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let p = self
            .store
            .get_portion(0, 0, self.num_rows(), self.num_cols())?;
        let mut out = Vec::with_capacity(p.len());
        for i in 0..p.num_rows() {
            for j in 0..p.num_cols() {
                out.push(p.get_f64(i, j));
            }
        }
        Ok(out)
    }

    /// Element-wise equality (exact, after widening to f64)
    pub fn equals(&self, other: &DenseMatrix) -> Result<bool> {
        if self.num_rows() != other.num_rows() || self.num_cols() != other.num_cols() {
            return Ok(false);
        }
        Ok(self.to_f64_vec()? == other.to_f64_vec()?)
    }
}

/// Create an in-memory matrix filled with one value
pub fn create_matrix(
    nrow: usize,
    ncol: usize,
    layout: Layout,
    value: Scalar,
) -> Result<DenseMatrix> {
    DenseMatrix::new(nrow, ncol, layout, &ConstFill::new(value))
}
