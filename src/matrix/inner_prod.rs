//! Generalized inner product, tall and wide algorithms
//!
//! Matrix multiplication has two shapes-driven algorithms. A tall left
//! operand streams row strips against a right operand pinned in memory and
//! stays lazy; a wide left operand reduces along its long inner dimension,
//! so partial products are computed per chunk and folded eagerly with the
//! right (addition) operator.

use super::DenseMatrix;
use crate::config;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::kernel::{dispatch_dtype, BinaryOp, BulkOperate};
use crate::scheduler;
use crate::store::virtual_store::PortionMapplyOp;
use crate::store::{Layout, LocalStore, MapplyStore, MatrixStore, MemStore};
use rayon::prelude::*;
use std::sync::Arc;

/// Entry point used by `DenseMatrix::inner_prod` after validation
pub(crate) fn inner_prod(
    a: &DenseMatrix,
    b: &DenseMatrix,
    left_op: BulkOperate,
    right_op: BulkOperate,
    out_layout: Option<Layout>,
) -> Result<DenseMatrix> {
    if a.is_wide() {
        inner_prod_wide(a, b, left_op, right_op, out_layout)
    } else {
        inner_prod_tall(a, b, left_op, right_op, out_layout)
    }
}

/// Tall case: the output is materialized lazily, one row strip at a time,
/// with the right operand held in memory.
fn inner_prod_tall(
    a: &DenseMatrix,
    b: &DenseMatrix,
    left_op: BulkOperate,
    right_op: BulkOperate,
    out_layout: Option<Layout>,
) -> Result<DenseMatrix> {
    let b_mem = b.conv_to_mem()?;
    let b_full = b_mem
        .store()
        .get_portion(0, 0, b_mem.num_rows(), b_mem.num_cols())?;
    let layout = out_layout.unwrap_or_else(|| a.store_layout());
    let op = Arc::new(InnerProdTallOp {
        left_op,
        right_op,
        b: b_full,
        nrow: a.num_rows(),
        ncol: b.num_cols(),
    });
    let node = MapplyStore::new(vec![Arc::clone(a.store())], op, layout)?;
    Ok(DenseMatrix::from_store(node))
}

/// Wide case: chunk the inner dimension, compute partial products in
/// parallel, and fold them in chunk order with the right operator.
fn inner_prod_wide(
    a: &DenseMatrix,
    b: &DenseMatrix,
    left_op: BulkOperate,
    right_op: BulkOperate,
    out_layout: Option<Layout>,
) -> Result<DenseMatrix> {
    // A column-major left operand prefers a column-major product; this is
    // a locality hint observable only through store_layout().
    let layout = out_layout.unwrap_or(match a.store_layout() {
        Layout::Col => Layout::Col,
        Layout::Row => Layout::Row,
    });
    let (m, k, n) = (a.num_rows(), a.num_cols(), b.num_cols());
    let step = config::config().portion_cols.min(k).max(1);
    let chunks: Vec<(usize, usize)> = {
        let mut v = Vec::new();
        let mut at = 0;
        while at < k {
            let len = step.min(k - at);
            v.push((at, len));
            at += len;
        }
        v
    };

    let run_chunk = |&(k0, kn): &(usize, usize)| -> Result<LocalStore> {
        let a_part = a.store().get_portion(0, k0, m, kn)?;
        let b_part = b.store().get_portion(k0, 0, kn, n)?;
        let mut partial = LocalStore::new_owned(0, 0, m, n, layout, left_op.output_dtype())?;
        gen_inner_prod(&a_part, &b_part, &left_op, &right_op, &mut partial)?;
        Ok(partial)
    };

    let partials: Vec<LocalStore> = if chunks.len() > 1 {
        scheduler::pool().install(|| chunks.par_iter().map(run_chunk).collect::<Result<_>>())?
    } else {
        chunks.iter().map(run_chunk).collect::<Result<_>>()?
    };

    // The fold runs in chunk order; the right operator must be associative
    // for integer kernels, floating addition is treated as order-tolerant.
    let mut iter = partials.into_iter();
    let mut acc = iter.next().expect("at least one inner chunk");
    let count = m * n;
    let mut scratch = vec![0u8; count * right_op.output_entry_size()];
    for p in iter {
        right_op.run_aa(count, acc.as_bytes(), p.as_bytes(), &mut scratch);
        acc.as_bytes_mut().copy_from_slice(&scratch);
    }
    Ok(DenseMatrix::from_store(MemStore::from_portion(&acc)?))
}

/// Portion operator for the tall product: one input row strip of the left
/// operand produces one output row strip.
struct InnerProdTallOp {
    left_op: BulkOperate,
    right_op: BulkOperate,
    /// The full right operand, resident in memory
    b: LocalStore,
    nrow: usize,
    ncol: usize,
}

impl PortionMapplyOp for InnerProdTallOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.right_op.output_dtype()
    }

    fn is_agg(&self) -> bool {
        true
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        if ins.len() != 1 {
            return Err(Error::internal("inner product expects one input strip"));
        }
        gen_inner_prod(&ins[0], &self.b, &self.left_op, &self.right_op, out)
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        Arc::new(InnerProdTallTOp {
            left_op: self.left_op,
            right_op: self.right_op,
            b: self.b.clone(),
            nrow: self.ncol,
            ncol: self.nrow,
        })
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!("({} %*% B[{}x{}])", ins[0].name(), self.b.num_rows(), self.b.num_cols())
    }
}

/// Transposed counterpart: inputs arrive transposed, the output strip is
/// the transposed product.
struct InnerProdTallTOp {
    left_op: BulkOperate,
    right_op: BulkOperate,
    b: LocalStore,
    nrow: usize,
    ncol: usize,
}

impl PortionMapplyOp for InnerProdTallTOp {
    fn out_num_rows(&self) -> usize {
        self.nrow
    }

    fn out_num_cols(&self) -> usize {
        self.ncol
    }

    fn out_dtype(&self) -> DType {
        self.right_op.output_dtype()
    }

    fn is_agg(&self) -> bool {
        true
    }

    fn run(&self, ins: &[LocalStore], out: &mut LocalStore) -> Result<()> {
        if ins.len() != 1 {
            return Err(Error::internal("inner product expects one input strip"));
        }
        // Undo the transposition, run the forward product, transpose back.
        let a_strip = ins[0].transpose();
        let mut fwd = LocalStore::new_owned(
            0,
            0,
            a_strip.num_rows(),
            self.b.num_cols(),
            out.layout().flip(),
            self.right_op.output_dtype(),
        )?;
        gen_inner_prod(&a_strip, &self.b, &self.left_op, &self.right_op, &mut fwd)?;
        out.copy_from(&fwd.transpose())
    }

    fn transpose(&self) -> Arc<dyn PortionMapplyOp> {
        Arc::new(InnerProdTallOp {
            left_op: self.left_op,
            right_op: self.right_op,
            b: self.b.clone(),
            nrow: self.ncol,
            ncol: self.nrow,
        })
    }

    fn name(&self, ins: &[Arc<dyn MatrixStore>]) -> String {
        format!("t({} %*% B)", ins[0].name())
    }
}

/// Generalized product of two local stores: `out = a x b` with scalar
/// multiply `left_op` and scalar add `right_op`
///
/// `a` is `m x k`, `b` is `k x n`, `out` is `m x n`. Floating MUL/ADD over
/// one dtype takes a cache-blocked multiply kernel; everything else runs
/// column-wise through the bulk kernels.
pub(crate) fn gen_inner_prod(
    a: &LocalStore,
    b: &LocalStore,
    left_op: &BulkOperate,
    right_op: &BulkOperate,
    out: &mut LocalStore,
) -> Result<()> {
    let (m, k) = (a.num_rows(), a.num_cols());
    let n = b.num_cols();
    if b.num_rows() != k || out.num_rows() != m || out.num_cols() != n {
        return Err(Error::shape_mismatch((k, n), (b.num_rows(), b.num_cols())));
    }

    let dtype = right_op.output_dtype();
    let fast = left_op.op() == BinaryOp::Mul
        && right_op.op() == BinaryOp::Add
        && dtype.is_float()
        && left_op.left_dtype() == dtype
        && left_op.right_dtype() == dtype;

    if fast {
        let a_row = to_layout_if(a, Layout::Row)?;
        let b_row = to_layout_if(b, Layout::Row)?;
        if out.layout() == Layout::Row {
            matmul_flat(dtype, a_row.as_bytes(), b_row.as_bytes(), out.as_bytes_mut(), m, n, k);
        } else {
            let mut scratch = LocalStore::new_owned(
                out.start_row(),
                out.start_col(),
                m,
                n,
                Layout::Row,
                dtype,
            )?;
            matmul_flat(
                dtype,
                a_row.as_bytes(),
                b_row.as_bytes(),
                scratch.as_bytes_mut(),
                m,
                n,
                k,
            );
            out.copy_from(&scratch)?;
        }
        return Ok(());
    }

    // Generic path: build each output column as a fold over k.
    let a_col = to_layout_if(a, Layout::Col)?;
    let osize = right_op.output_entry_size();
    let lsize = left_op.left_entry_size();
    let mut acc = vec![0u8; m * osize];
    let mut term = vec![0u8; m * osize];
    let mut fold = vec![0u8; m * osize];
    let mut result = LocalStore::new_owned(
        out.start_row(),
        out.start_col(),
        m,
        n,
        Layout::Col,
        dtype,
    )?;
    {
        let a_bytes = a_col.as_bytes();
        for j in 0..n {
            let col0 = &a_bytes[..m * lsize];
            left_op.run_ae(m, col0, b.get_scalar(0, j), &mut acc);
            for kk in 1..k {
                let colk = &a_bytes[kk * m * lsize..(kk + 1) * m * lsize];
                left_op.run_ae(m, colk, b.get_scalar(kk, j), &mut term);
                right_op.run_aa(m, &acc, &term, &mut fold);
                acc.copy_from_slice(&fold);
            }
            let d = j * m * osize;
            result.as_bytes_mut()[d..d + m * osize].copy_from_slice(&acc);
        }
    }
    if out.layout() == Layout::Col {
        out.as_bytes_mut().copy_from_slice(result.as_bytes());
        Ok(())
    } else {
        out.copy_from(&result)
    }
}

fn to_layout_if(p: &LocalStore, layout: Layout) -> Result<LocalStore> {
    if p.layout() == layout {
        Ok(p.clone())
    } else {
        p.to_layout(layout)
    }
}

/// Cache-blocked row-major multiply-accumulate kernel
///
/// `out` must be zeroed; blocking along k keeps the working set of `b`
/// inside the configured cache size.
fn matmul_flat(dtype: DType, a: &[u8], b: &[u8], out: &mut [u8], m: usize, n: usize, k: usize) {
    let cache = config::config().cpu_cache_size;
    dispatch_dtype!(dtype, T => {
        matmul_typed::<T>(
            bytemuck::cast_slice(a),
            bytemuck::cast_slice(b),
            bytemuck::cast_slice_mut(out),
            m,
            n,
            k,
            cache,
        );
    });
}

fn matmul_typed<T: Element>(a: &[T], b: &[T], out: &mut [T], m: usize, n: usize, k: usize, cache: usize) {
    let kb = (cache / (std::mem::size_of::<T>() * n.max(1))).clamp(16, k.max(16));
    let mut k0 = 0;
    while k0 < k {
        let kend = (k0 + kb).min(k);
        for i in 0..m {
            for kk in k0..kend {
                let aik = a[i * k + kk];
                let brow = &b[kk * n..(kk + 1) * n];
                let orow = &mut out[i * n..(i + 1) * n];
                for j in 0..n {
                    orow[j] = orow[j].add(aik.mul(brow[j]));
                }
            }
        }
        k0 = kend;
    }
}
