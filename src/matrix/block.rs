//! Block matrix façade
//!
//! A [`BlockMatrix`] wraps a combined store plus an immutable block size.
//! Along the short axis the matrix is cut into blocks of that width; each
//! block spans the whole long axis. Arithmetic operations fan out to the
//! members and rebuild the group, preserving the partition; the two inner
//! product algorithms drive the block layout.

use super::DenseMatrix;
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::kernel::{BinaryOp, BulkOperate, BulkUnary};
use crate::ops::GsumOp;
use crate::scheduler;
use crate::store::virtual_store::MaterializeLevel;
use crate::store::{CombinedStore, Layout, MatrixStore, MemStore, SetOperate};
use crate::vector::Vector;
use std::sync::Arc;
use tracing::warn;

/// A dense matrix backed by a group of equally shaped blocks
#[derive(Clone)]
pub struct BlockMatrix {
    store: Arc<CombinedStore>,
    block_size: usize,
}

impl BlockMatrix {
    /// Wrap a combined store, validating the block invariant
    ///
    /// All members but the last must agree on the short-axis width.
    pub fn from_store(store: Arc<CombinedStore>) -> Result<Self> {
        let n = store.num_mats();
        let short_len = |i: usize| {
            let m = store.get_mat(i);
            if store.rows_concat() {
                m.num_rows()
            } else {
                m.num_cols()
            }
        };
        for i in 1..n.saturating_sub(1) {
            if short_len(i) != short_len(i - 1) {
                warn!("the matrices have different block sizes");
                return Err(Error::incompatible_operator(
                    "block_matrix",
                    "members have different block sizes",
                ));
            }
        }
        let block_size = short_len(0);
        Ok(Self { store, block_size })
    }

    /// Re-interpret a dense matrix whose store is a block group
    pub fn from_dense(mat: &DenseMatrix) -> Result<Self> {
        match mat.store().as_combined() {
            Some(c) => Self::from_store(c.with_members(c.members().to_vec())?),
            None => Err(Error::incompatible_operator(
                "block_matrix",
                "the matrix isn't backed by a block group",
            )),
        }
    }

    /// Create a block matrix initialized by `init`
    ///
    /// A tall matrix is cut into column blocks of `block_size` (column-major
    /// members); a wide one into row blocks (row-major members). The last
    /// block may be narrower.
    pub fn new(
        nrow: usize,
        ncol: usize,
        block_size: usize,
        dtype: DType,
        init: &dyn SetOperate,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::incompatible_operator(
                "block_matrix",
                "block size must be positive",
            ));
        }
        let tall = nrow > ncol;
        let (short, layout) = if tall {
            (ncol, Layout::Col)
        } else {
            (nrow, Layout::Row)
        };
        let mut members: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(short.div_ceil(block_size));
        let mut at = 0;
        while at < short {
            let w = block_size.min(short - at);
            let member = if tall {
                MemStore::new(nrow, w, layout, dtype)?
            } else {
                MemStore::new(w, ncol, layout, dtype)?
            };
            members.push(member);
            at += w;
        }
        let store = CombinedStore::new(members, layout)?;
        // Initializing through the group hands the members global
        // coordinates.
        store.set_data(init)?;
        Self::from_store(store)
    }

    /// The block group backing this matrix
    pub fn store(&self) -> &Arc<CombinedStore> {
        &self.store
    }

    /// The short-axis width of each non-tail block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the group
    pub fn num_blocks(&self) -> usize {
        self.store.num_mats()
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

    /// Physical element order of the members
    pub fn store_layout(&self) -> Layout {
        self.store.store_layout()
    }

    /// Whether `ncol >= nrow`
    pub fn is_wide(&self) -> bool {
        self.num_cols() >= self.num_rows()
    }

    /// Whether any member defers a computation
    pub fn is_virtual(&self) -> bool {
        self.store.is_virtual()
    }

    /// The same matrix through the dense façade
    pub fn to_dense(&self) -> DenseMatrix {
        DenseMatrix::from_store(Arc::clone(&self.store) as Arc<dyn MatrixStore>)
    }

    fn member(&self, i: usize) -> DenseMatrix {
        DenseMatrix::from_store(self.store.get_mat(i))
    }

    fn rebuild(&self, members: Vec<Arc<dyn MatrixStore>>) -> Result<BlockMatrix> {
        BlockMatrix::from_store(self.store.with_members(members)?)
    }

    // ------------------------------------------------------------------
    // Slicing
    // ------------------------------------------------------------------

    /// Column `idx` as a vector (tall groups only)
    pub fn get_col(&self, idx: usize) -> Result<Vector> {
        if idx >= self.num_cols() {
            warn!("the col index is out of bound");
            return Err(Error::index_out_of_range(idx, self.num_cols()));
        }
        if self.is_wide() {
            warn!("can't get a column from a group of wide matrices");
            return Err(Error::OrientationMismatch {
                op: "get_col",
                orientation: "wide",
            });
        }
        let mat_idx = idx / self.block_size;
        let local = idx % self.block_size;
        self.member(mat_idx).get_col(local)
    }

    /// Row `idx` as a vector (wide groups only)
    pub fn get_row(&self, idx: usize) -> Result<Vector> {
        if idx >= self.num_rows() {
            warn!("the row index is out of bound");
            return Err(Error::index_out_of_range(idx, self.num_rows()));
        }
        if !self.is_wide() {
            warn!("can't get a row from a group of tall matrices");
            return Err(Error::OrientationMismatch {
                op: "get_row",
                orientation: "tall",
            });
        }
        let mat_idx = idx / self.block_size;
        let local = idx % self.block_size;
        self.member(mat_idx).get_row(local)
    }

    /// Group ascending indices by target block
    fn group_by_block(&self, idxs: &[usize]) -> (Vec<usize>, Vec<Vec<usize>>) {
        let mut mat_idxs = vec![idxs[0] / self.block_size];
        let mut local_idxs = vec![vec![idxs[0] % self.block_size]];
        for &idx in &idxs[1..] {
            let mat_idx = idx / self.block_size;
            let local = idx % self.block_size;
            if mat_idx != *mat_idxs.last().unwrap() {
                mat_idxs.push(mat_idx);
                local_idxs.push(vec![local]);
            } else {
                local_idxs.last_mut().unwrap().push(local);
            }
        }
        (mat_idxs, local_idxs)
    }

    fn check_slice_indices(idxs: &[usize], bound: usize, op: &'static str) -> Result<()> {
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

    /// The columns selected by `idxs`, forwarded block by block
    ///
    /// The resulting sub-matrices may have unequal widths, so the result is
    /// a dense matrix over a fresh group rather than a block matrix.
    pub fn get_cols(&self, idxs: &[usize]) -> Result<DenseMatrix> {
        if self.is_wide() {
            warn!("can't get columns from a group of wide matrices");
            return Err(Error::OrientationMismatch {
                op: "get_cols",
                orientation: "wide",
            });
        }
        Self::check_slice_indices(idxs, self.num_cols(), "get_cols")?;
        let (mat_idxs, local_idxs) = self.group_by_block(idxs);
        let mut stores: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(mat_idxs.len());
        for (mi, locals) in mat_idxs.iter().zip(&local_idxs) {
            let sliced = self.member(*mi).get_cols(locals)?;
            stores.push(Arc::clone(sliced.store()));
        }
        let combined = CombinedStore::new(stores, Layout::Col)?;
        Ok(DenseMatrix::from_store(combined))
    }

    /// The rows selected by `idxs`, forwarded block by block
    pub fn get_rows(&self, idxs: &[usize]) -> Result<DenseMatrix> {
        if !self.is_wide() {
            warn!("can't get rows from a group of tall matrices");
            return Err(Error::OrientationMismatch {
                op: "get_rows",
                orientation: "tall",
            });
        }
        Self::check_slice_indices(idxs, self.num_rows(), "get_rows")?;
        let (mat_idxs, local_idxs) = self.group_by_block(idxs);
        let mut stores: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(mat_idxs.len());
        for (mi, locals) in mat_idxs.iter().zip(&local_idxs) {
            let sliced = self.member(*mi).get_rows(locals)?;
            stores.push(Arc::clone(sliced.store()));
        }
        let combined = CombinedStore::new(stores, Layout::Row)?;
        Ok(DenseMatrix::from_store(combined))
    }

    // ------------------------------------------------------------------
    // Element-wise operations
    // ------------------------------------------------------------------

    /// Broadcast `vals` over every row of each member
    ///
    /// A wide group passes the vector unchanged to every member; a tall
    /// group routes consecutive segments to the member covering them.
    pub fn mapply_rows(&self, vals: &Vector, op: BulkOperate) -> Result<BlockMatrix> {
        if self.num_cols() != vals.len() {
            warn!("the vector's length needs to equal the number of columns");
            return Err(Error::shape_mismatch(
                (1, self.num_cols()),
                (1, vals.len()),
            ));
        }
        let mut members: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(self.num_blocks());
        if self.is_wide() {
            for i in 0..self.num_blocks() {
                let res = self.member(i).mapply_rows(vals, op)?;
                members.push(Arc::clone(res.store()));
            }
        } else {
            let mut val_start = 0;
            for i in 0..self.num_blocks() {
                let llen = self.store.get_mat(i).num_cols();
                let part = vals.sub_vec(val_start, llen)?;
                let res = self.member(i).mapply_rows(&part, op)?;
                members.push(Arc::clone(res.store()));
                val_start += llen;
            }
            debug_assert_eq!(val_start, vals.len());
        }
        self.rebuild(members)
    }

    /// Broadcast `vals` over every column of each member
    pub fn mapply_cols(&self, vals: &Vector, op: BulkOperate) -> Result<BlockMatrix> {
        if self.num_rows() != vals.len() {
            warn!("the vector's length needs to equal the number of rows");
            return Err(Error::shape_mismatch(
                (self.num_rows(), 1),
                (vals.len(), 1),
            ));
        }
        Ok(self.transpose().mapply_rows(vals, op)?.transpose())
    }

    /// Element-wise binary operation against another block matrix
    ///
    /// The operand must share the shape and block size so the partition can
    /// be preserved member by member.
    pub fn mapply2(&self, other: &BlockMatrix, op: BulkOperate) -> Result<BlockMatrix> {
        if self.num_rows() != other.num_rows() || self.num_cols() != other.num_cols() {
            warn!("the matrix size isn't compatible");
            return Err(Error::shape_mismatch(
                (self.num_rows(), self.num_cols()),
                (other.num_rows(), other.num_cols()),
            ));
        }
        if self.block_size() != other.block_size() {
            warn!("the input matrix has a different block size");
            return Err(Error::incompatible_operator(
                "mapply2",
                "the operand has a different block size",
            ));
        }
        let mut members: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(self.num_blocks());
        for i in 0..self.num_blocks() {
            let res = self.member(i).mapply2(&other.member(i), op)?;
            members.push(Arc::clone(res.store()));
        }
        self.rebuild(members)
    }

    /// Unary kernel applied per element, member by member
    pub fn sapply(&self, op: BulkUnary) -> Result<BlockMatrix> {
        let mut members: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(self.num_blocks());
        for i in 0..self.num_blocks() {
            let res = self.member(i).sapply(op)?;
            members.push(Arc::clone(res.store()));
        }
        self.rebuild(members)
    }

    /// The transposed block matrix: swapped shape, flipped orientation, the
    /// same member count and block size
    pub fn transpose(&self) -> BlockMatrix {
        BlockMatrix {
            store: self.store.transpose_group(),
            block_size: self.block_size,
        }
    }

    /// Reduce the whole group to one scalar
    pub fn aggregate(&self, op: BulkOperate) -> Result<Scalar> {
        self.to_dense().aggregate(op)
    }

    // ------------------------------------------------------------------
    // Materialization
    // ------------------------------------------------------------------

    /// Materialize every deferred member and rebind the group
    pub fn materialize_self(&mut self) -> Result<()> {
        if !self.is_virtual() {
            return Ok(());
        }
        let members = scheduler::co_materialize(self.store.members(), true)?;
        self.store = self.store.with_members(members)?;
        Ok(())
    }

    /// Change the materialize level of every deferred member
    pub fn set_materialize_level(&self, level: MaterializeLevel) {
        for m in self.store.members() {
            if let Some(v) = m.as_virtual() {
                v.set_materialize_level(level);
            }
        }
    }

    /// Rebind this matrix to share `other`'s group
    pub fn assign(&mut self, other: &BlockMatrix) {
        self.store = Arc::clone(&other.store);
        self.block_size = other.block_size;
    }

    // ------------------------------------------------------------------
    // Inner product
    // ------------------------------------------------------------------

    /// Generalized matrix product specialized for the block partition
    pub fn inner_prod(
        &self,
        other: &DenseMatrix,
        left_op: BulkOperate,
        right_op: BulkOperate,
        out_layout: Option<Layout>,
    ) -> Result<DenseMatrix> {
        self.to_dense()
            .verify_inner_prod(other, &left_op, &right_op)?;
        if self.is_wide() {
            self.inner_prod_wide(other, left_op, right_op, out_layout)
        } else {
            self.inner_prod_tall(other, left_op, right_op, out_layout)
        }
    }

    /// Matrix multiplication with the block algorithms
    ///
    /// When the right operand is longer than this matrix the whole
    /// computation is transposed so the big operand stays on the left.
    pub fn multiply(&self, other: &DenseMatrix, out_layout: Option<Layout>) -> Result<DenseMatrix> {
        let long_dim1 = self.num_rows().max(self.num_cols());
        let long_dim2 = other.num_rows().max(other.num_cols());
        if long_dim2 > long_dim1 {
            let t_self = self.transpose().to_dense();
            let t_other = other.transpose();
            let t_layout = out_layout.map(Layout::flip);
            let t_res = t_other.multiply(&t_self, t_layout)?;
            return Ok(t_res.transpose());
        }
        let left_op = BulkOperate::new(self.dtype(), other.dtype(), BinaryOp::Mul);
        let right_op = BulkOperate::same(left_op.output_dtype(), BinaryOp::Add);
        self.inner_prod(other, left_op, right_op, out_layout)
    }

    /// Tall algorithm: per output column block, multiply every left block
    /// against the matching slice of the right operand and fold the
    /// temporaries with `right_op`.
    fn inner_prod_tall(
        &self,
        other: &DenseMatrix,
        left_op: BulkOperate,
        right_op: BulkOperate,
        out_layout: Option<Layout>,
    ) -> Result<DenseMatrix> {
        let layout = out_layout.unwrap_or(Layout::Col);
        let m2 = other.conv_to_mem()?;
        let bs = self.block_size;
        let mut res_blocks: Vec<Arc<dyn MatrixStore>> = Vec::new();

        let mut m2_col = 0;
        while m2_col < m2.num_cols() {
            let w = bs.min(m2.num_cols() - m2_col);
            let mut tmp: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(self.num_blocks());
            let mut m2_row = 0;
            while m2_row < m2.num_rows() {
                let i = m2_row / bs;
                let h = bs.min(m2.num_rows() - m2_row);
                let left = self.member(i);
                let part = get_sub_mat(&m2, m2_row, m2_col, h, w)?;
                let t = left.inner_prod(&part, left_op, right_op, Some(layout))?;
                // Intermediates are streamed once; keeping their portions
                // (and the backing store's) cached would evict useful data.
                t.store().set_cache_portion(false);
                tmp.push(Arc::clone(t.store()));
                m2_row += h;
            }
            // The fold materializes hierarchically so external blocks are
            // read in serial.
            let gsum = GsumOp::new(right_op, self.num_rows(), w);
            let folded = scheduler::mapply_portions(&tmp, gsum, layout, false)?;
            res_blocks.push(folded);
            m2_col += w;
        }

        if res_blocks.len() == 1 {
            Ok(DenseMatrix::from_store(res_blocks.remove(0)))
        } else {
            Ok(DenseMatrix::from_store(CombinedStore::new(
                res_blocks, layout,
            )?))
        }
    }

    /// Wide algorithm: every left block contributes a disjoint row strip of
    /// the output, so the temporaries are copied into place without a fold.
    fn inner_prod_wide(
        &self,
        other: &DenseMatrix,
        left_op: BulkOperate,
        right_op: BulkOperate,
        out_layout: Option<Layout>,
    ) -> Result<DenseMatrix> {
        let right_mats: Vec<Arc<dyn MatrixStore>> = match other.store().as_combined() {
            Some(c) => c.members().to_vec(),
            None => vec![Arc::clone(other.store())],
        };
        // A column-major left group prefers a column-major product; the
        // hint is observable only through store_layout().
        let layout = out_layout.unwrap_or({
            if self.store.get_mat(0).store_layout() == Layout::Col {
                Layout::Col
            } else {
                Layout::Row
            }
        });

        let res = MemStore::new(
            self.num_rows(),
            other.num_cols(),
            layout,
            right_op.output_dtype(),
        )?;
        let mut col_idx = 0;
        for rm in &right_mats {
            let right = DenseMatrix::from_store(Arc::clone(rm));
            let mut tmp: Vec<Arc<dyn MatrixStore>> = Vec::with_capacity(self.num_blocks());
            for j in 0..self.num_blocks() {
                let left = self.member(j);
                let t = left.inner_prod(&right, left_op, right_op, Some(layout))?;
                left.store().set_cache_portion(false);
                tmp.push(Arc::clone(t.store()));
            }
            // Siblings share the right block; co-materialize so it is read
            // only once.
            let materialized = scheduler::co_materialize(&tmp, false)?;
            for (j, t) in materialized.iter().enumerate() {
                let row_idx = self.store.member_offset(j);
                let part = t.get_portion(0, 0, t.num_rows(), t.num_cols())?;
                res.write_portion(&part, row_idx, col_idx)?;
            }
            col_idx += rm.num_cols();
        }
        Ok(DenseMatrix::from_store(res))
    }
}

/// Pin a rectangular slice of an in-memory matrix into its own store
fn get_sub_mat(
    mat: &DenseMatrix,
    start_row: usize,
    start_col: usize,
    num_rows: usize,
    num_cols: usize,
) -> Result<DenseMatrix> {
    let portion = mat
        .store()
        .get_portion(start_row, start_col, num_rows, num_cols)?;
    Ok(DenseMatrix::from_store(MemStore::from_portion(&portion)?))
}
