//! Built-in portion operators
//!
//! Each operator consumes aligned input portions and fills one output
//! portion. Inputs may arrive in either layout; operators normalize to the
//! output layout before running the flat kernels, so results are
//! independent of operand layout.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::kernel::{BulkOperate, BulkUnary};
use crate::store::virtual_store::PortionMapplyOp;
use crate::store::{Layout, LocalStore, MatrixStore};
use std::sync::Arc;

fn normalized(p: &LocalStore, layout: Layout) -> Result<LocalStore> {
    if p.layout() == layout {
        Ok(p.clone())
    } else {
        p.to_layout(layout)
    }
}

fn expect_inputs(ins: &[LocalStore], n: usize) -> Result<()> {
    if ins.len() != n {
        return Err(Error::internal(format!(
            "operator expected {} inputs, got {}",
            n,
            ins.len()
        )));
    }
    Ok(())
}

// ============================================================================
// identity
// ============================================================================

/// Copy-through operator
pub struct IdentityOp {
    nrow: usize,
    ncol: usize,
    dtype: DType,
}

impl IdentityOp {
    /// Copy a matrix of the given shape
    pub fn new(nrow: usize, ncol: usize, dtype: DType) -> Arc<Self> {
        Arc::new(Self { nrow, ncol, dtype })
    }
}

impl PortionMapplyOp for IdentityOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.dtype
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        expect_inputs(ins, 1)?;
        out.copy_from(&ins[0])
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        IdentityOp::new(self.ncol, self.nrow, self.dtype)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!("copy({})", ins[0].name())
    }
}

// ============================================================================
// sapply
// ============================================================================

/// Unary kernel applied per element
pub struct SapplyOp {
    op: BulkUnary,
    nrow: usize,
    ncol: usize,
}

impl SapplyOp {
    /// Apply `op` to every element of an `nrow x ncol` input
    pub fn new(op: BulkUnary, nrow: usize, ncol: usize) -> Arc<Self> {
        Arc::new(Self { op, nrow, ncol })
    }
}

impl PortionMapplyOp for SapplyOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.op.dtype()
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        expect_inputs(ins, 1)?;
        let a = normalized(&ins[0], out.layout())?;
        let n = out.len();
        self.op.run_a(n, a.as_bytes(), out.as_bytes_mut());
        Ok(())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        SapplyOp::new(self.op, self.ncol, self.nrow)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!("{:?}({})", self.op.op(), ins[0].name())
    }
}

// ============================================================================
// mapply2
// ============================================================================

/// Binary kernel applied per element over two same-shaped inputs
pub struct Mapply2Op {
    op: BulkOperate,
    nrow: usize,
    ncol: usize,
}

impl Mapply2Op {
    /// Element-wise `op` over two `nrow x ncol` inputs
    pub fn new(op: BulkOperate, nrow: usize, ncol: usize) -> Arc<Self> {
        Arc::new(Self { op, nrow, ncol })
    }
}

impl PortionMapplyOp for Mapply2Op {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.op.output_dtype()
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        expect_inputs(ins, 2)?;
        let a = normalized(&ins[0], out.layout())?;
        let b = normalized(&ins[1], out.layout())?;
        let n = out.len();
        self.op.run_aa(n, a.as_bytes(), b.as_bytes(), out.as_bytes_mut());
        Ok(())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        Mapply2Op::new(self.op, self.ncol, self.nrow)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!(
            "({}{}{})",
            ins[0].name(),
            self.op.op().symbol(),
            ins[1].name()
        )
    }
}

// ============================================================================
// mapply_rows / mapply_cols
// ============================================================================

/// Broadcast a row vector over every row: `out[i,j] = op(a[i,j], v[j])`
pub struct MapplyRowsOp {
    op: BulkOperate,
    nrow: usize,
    ncol: usize,
}

impl MapplyRowsOp {
    /// Row-broadcast `op`; the second input is a `1 x ncol` vector
    pub fn new(op: BulkOperate, nrow: usize, ncol: usize) -> Arc<Self> {
        Arc::new(Self { op, nrow, ncol })
    }
}

impl PortionMapplyOp for MapplyRowsOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.op.output_dtype()
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        expect_inputs(ins, 2)?;
        let a = normalized(&ins[0], out.layout())?;
        let v = &ins[1];
        let (nr, nc) = (out.num_rows(), out.num_cols());
        let lsize = self.op.left_entry_size();
        let osize = self.op.output_entry_size();
        match out.layout() {
            Layout::Row => {
                // One array-array run per row against the vector.
                let vrow = normalized(v, Layout::Row)?;
                for i in 0..nr {
                    let s = a.elem_index(i, 0) * lsize;
                    let d = out.elem_index(i, 0) * osize;
                    let a_bytes = a.as_bytes();
                    let v_bytes = vrow.as_bytes();
                    let lhs = &a_bytes[s..s + nc * lsize];
                    let line = nc * osize;
                    self.op
                        .run_aa(nc, lhs, v_bytes, &mut out.as_bytes_mut()[d..d + line]);
                }
            }
            Layout::Col => {
                // One array-element run per column with the vector entry.
                for j in 0..nc {
                    let e = v.get_scalar(0, j);
                    let s = a.elem_index(0, j) * lsize;
                    let d = out.elem_index(0, j) * osize;
                    let a_bytes = a.as_bytes();
                    let lhs = &a_bytes[s..s + nr * lsize];
                    let line = nr * osize;
                    self.op
                        .run_ae(nr, lhs, e, &mut out.as_bytes_mut()[d..d + line]);
                }
            }
        }
        Ok(())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        MapplyColsOp::new(self.op, self.ncol, self.nrow)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!(
            "mapply_rows({}, {}, {})",
            ins[0].name(),
            ins[1].name(),
            self.op.op().symbol()
        )
    }
}

/// Broadcast a column vector over every column: `out[i,j] = op(a[i,j], v[i])`
pub struct MapplyColsOp {
    op: BulkOperate,
    nrow: usize,
    ncol: usize,
}

impl MapplyColsOp {
    /// Column-broadcast `op`; the second input is an `nrow x 1` vector
    pub fn new(op: BulkOperate, nrow: usize, ncol: usize) -> Arc<Self> {
        Arc::new(Self { op, nrow, ncol })
    }
}

impl PortionMapplyOp for MapplyColsOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.op.output_dtype()
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        expect_inputs(ins, 2)?;
        let a = normalized(&ins[0], out.layout())?;
        let v = &ins[1];
        let (nr, nc) = (out.num_rows(), out.num_cols());
        let lsize = self.op.left_entry_size();
        let osize = self.op.output_entry_size();
        match out.layout() {
            Layout::Row => {
                for i in 0..nr {
                    let e = v.get_scalar(i, 0);
                    let s = a.elem_index(i, 0) * lsize;
                    let d = out.elem_index(i, 0) * osize;
                    let a_bytes = a.as_bytes();
                    let lhs = &a_bytes[s..s + nc * lsize];
                    let line = nc * osize;
                    self.op
                        .run_ae(nc, lhs, e, &mut out.as_bytes_mut()[d..d + line]);
                }
            }
            Layout::Col => {
                let vcol = normalized(v, Layout::Col)?;
                for j in 0..nc {
                    let s = a.elem_index(0, j) * lsize;
                    let d = out.elem_index(0, j) * osize;
                    let a_bytes = a.as_bytes();
                    let v_bytes = vcol.as_bytes();
                    let lhs = &a_bytes[s..s + nr * lsize];
                    let line = nr * osize;
                    self.op
                        .run_aa(nr, lhs, v_bytes, &mut out.as_bytes_mut()[d..d + line]);
                }
            }
        }
        Ok(())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        MapplyRowsOp::new(self.op, self.ncol, self.nrow)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!(
            "mapply_cols({}, {}, {})",
            ins[0].name(),
            ins[1].name(),
            self.op.op().symbol()
        )
    }
}

// ============================================================================
// gsum
// ============================================================================

/// Generalized sum: fold a list of same-shaped inputs with a binary kernel
///
/// Inputs are folded in list order. The kernel must be associative for the
/// result to be independent of how block products were grouped; floating
/// addition is treated as order-tolerant.
pub struct GsumOp {
    op: BulkOperate,
    nrow: usize,
    ncol: usize,
}

impl GsumOp {
    /// Fold same-shaped `nrow x ncol` inputs with `op`
    pub fn new(op: BulkOperate, nrow: usize, ncol: usize) -> Arc<Self> {
        Arc::new(Self { op, nrow, ncol })
    }
}

impl PortionMapplyOp for GsumOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.op.output_dtype()
    }

    fn is_agg(&self) -> bool {
        true
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        if ins.is_empty() {
            return Err(Error::internal("gsum needs at least one input"));
        }
        let first = normalized(&ins[0], out.layout())?;
        out.copy_from(&first)?;
        if ins.len() == 1 {
            return Ok(());
        }
        let n = out.len();
        let mut scratch = vec![0u8; n * self.op.output_entry_size()];
        for input in &ins[1..] {
            let rhs = normalized(input, out.layout())?;
            self.op.run_aa(n, out.as_bytes(), rhs.as_bytes(), &mut scratch);
            out.as_bytes_mut().copy_from_slice(&scratch);
        }
        Ok(())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        GsumOp::new(self.op, self.ncol, self.nrow)
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        let names: Vec<String> = ins.iter().map(|m| m.name()).collect();
        format!("({})", names.join(self.op.op().symbol()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Scalar;
    use crate::kernel::{BinaryOp, UnaryOp};
    use crate::store::{MemStore, Storage};

    fn local(data: &[f64], nrow: usize, ncol: usize, layout: Layout) -> LocalStore {
        let storage = Storage::from_slice(data).unwrap();
        LocalStore::from_storage(storage, 0, 0, 0, nrow, ncol, layout, DType::F64)
    }

    fn out(nrow: usize, ncol: usize, layout: Layout) -> LocalStore {
        LocalStore::new_owned(0, 0, nrow, ncol, layout, DType::F64).unwrap()
    }

    #[test]
    fn test_mapply2_layout_mix() {
        let a = local(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
        let b = local(&[10.0, 30.0, 20.0, 40.0], 2, 2, Layout::Col);
        let op = Mapply2Op::new(BulkOperate::same(DType::F64, BinaryOp::Add), 2, 2);
        let mut o = out(2, 2, Layout::Row);
        op.run(&[a, b], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 0), 11.0);
        assert_eq!(o.get_f64(0, 1), 22.0);
        assert_eq!(o.get_f64(1, 0), 33.0);
        assert_eq!(o.get_f64(1, 1), 44.0);
    }

    #[test]
    fn test_sapply_sqrt() {
        let a = local(&[1.0, 4.0, 9.0, 16.0], 2, 2, Layout::Col);
        let op = SapplyOp::new(BulkUnary::new(DType::F64, UnaryOp::Sqrt), 2, 2);
        let mut o = out(2, 2, Layout::Col);
        op.run(&[a], &mut o).unwrap();
        assert_eq!(o.get_f64(1, 1), 4.0);
    }

    #[test]
    fn test_mapply_rows_row_layout() {
        let a = local(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
        let v = local(&[10.0, 100.0, 1000.0], 1, 3, Layout::Row);
        let op = MapplyRowsOp::new(BulkOperate::same(DType::F64, BinaryOp::Mul), 2, 3);
        let mut o = out(2, 3, Layout::Row);
        op.run(&[a, v], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 0), 10.0);
        assert_eq!(o.get_f64(0, 2), 3000.0);
        assert_eq!(o.get_f64(1, 1), 500.0);
    }

    #[test]
    fn test_mapply_cols_col_layout() {
        let a = local(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Col);
        let v = local(&[10.0, 100.0], 2, 1, Layout::Col);
        let op = MapplyColsOp::new(BulkOperate::same(DType::F64, BinaryOp::Add), 2, 2);
        let mut o = out(2, 2, Layout::Col);
        op.run(&[a, v], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 0), 11.0);
        assert_eq!(o.get_f64(1, 0), 102.0);
        assert_eq!(o.get_f64(1, 1), 104.0);
    }

    #[test]
    fn test_gsum_folds_in_order() {
        let a = local(&[1.0, 1.0], 2, 1, Layout::Col);
        let b = local(&[2.0, 2.0], 2, 1, Layout::Col);
        let c = local(&[4.0, 4.0], 2, 1, Layout::Col);
        let op = GsumOp::new(BulkOperate::same(DType::F64, BinaryOp::Add), 2, 1);
        let mut o = out(2, 1, Layout::Col);
        op.run(&[a, b, c], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 0), 7.0);
        assert_eq!(o.get_f64(1, 0), 7.0);
    }

    #[test]
    fn test_gsum_single_input_copies() {
        let a = local(&[5.0, 6.0], 1, 2, Layout::Row);
        let op = GsumOp::new(BulkOperate::same(DType::F64, BinaryOp::Add), 1, 2);
        let mut o = out(1, 2, Layout::Row);
        op.run(&[a], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 1), 6.0);
    }

    #[test]
    fn test_identity_through_store() {
        let store = MemStore::from_slice(&[1.0f64, 2.0], 1, 2, Layout::Row).unwrap();
        let p = store.get_portion(0, 0, 1, 2).unwrap();
        let op = IdentityOp::new(1, 2, DType::F64);
        let mut o = out(1, 2, Layout::Row);
        op.run(&[p], &mut o).unwrap();
        assert_eq!(o.get_f64(0, 0), 1.0);
    }
}
