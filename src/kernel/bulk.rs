//! Type-erased kernel tables
//!
//! [`BulkOperate`], [`BulkUnary`], and [`AggOperate`] are the operator
//! handles the matrix façades pass around. They carry the operand dtypes and
//! dispatch to a monomorphized kernel once per run; mixed-dtype operands are
//! promoted by converting the narrower side before the loop.

use super::registry;
use super::{cast_run, dispatch_dtype, BinaryOp, UnaryOp};
use crate::dtype::{promote, DType, Scalar};
use crate::error::{Error, Result};
use std::borrow::Cow;

fn cast_bytes<'a>(n: usize, src: &'a [u8], from: DType, to: DType) -> Cow<'a, [u8]> {
    if from == to {
        return Cow::Borrowed(src);
    }
    let mut out = vec![0u8; n * to.size_in_bytes()];
    dispatch_dtype!(from, L => {
        dispatch_dtype!(to, O => {
            unsafe { cast_run::<L, O>(n, src.as_ptr(), out.as_mut_ptr()) };
        })
    });
    Cow::Owned(out)
}

fn cast_scalar(s: Scalar, to: DType) -> Scalar {
    if s.dtype() == to {
        s
    } else {
        Scalar::from_f64(to, s.to_f64())
    }
}

/// A binary kernel with self-describing operand types
///
/// The three run modes mirror the shapes the portion ops need: array-array,
/// array-element, and element-array. The output dtype is the promotion of
/// the two input dtypes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BulkOperate {
    op: BinaryOp,
    left: DType,
    right: DType,
    output: DType,
}

impl BulkOperate {
    /// Build the kernel handle for `op` over `(left, right)` operands
    pub fn new(left: DType, right: DType, op: BinaryOp) -> Self {
        Self {
            op,
            left,
            right,
            output: promote(left, right),
        }
    }

    /// Same-dtype shorthand
    pub fn same(dtype: DType, op: BinaryOp) -> Self {
        Self::new(dtype, dtype, op)
    }

    /// The operation this kernel performs
    #[inline]
    pub fn op(&self) -> BinaryOp {
        self.op
    }

    /// Left operand dtype
    #[inline]
    pub fn left_dtype(&self) -> DType {
        self.left
    }

    /// Right operand dtype
    #[inline]
    pub fn right_dtype(&self) -> DType {
        self.right
    }

    /// Output dtype
    #[inline]
    pub fn output_dtype(&self) -> DType {
        self.output
    }

    /// Bytes per left entry
    #[inline]
    pub fn left_entry_size(&self) -> usize {
        self.left.size_in_bytes()
    }

    /// Bytes per right entry
    #[inline]
    pub fn right_entry_size(&self) -> usize {
        self.right.size_in_bytes()
    }

    /// Bytes per output entry
    #[inline]
    pub fn output_entry_size(&self) -> usize {
        self.output.size_in_bytes()
    }

    /// Array-array: `out[i] = op(lhs[i], rhs[i])`
    pub fn run_aa(&self, n: usize, lhs: &[u8], rhs: &[u8], out: &mut [u8]) {
        debug_assert!(lhs.len() >= n * self.left_entry_size());
        debug_assert!(rhs.len() >= n * self.right_entry_size());
        debug_assert!(out.len() >= n * self.output_entry_size());
        let lhs = cast_bytes(n, lhs, self.left, self.output);
        let rhs = cast_bytes(n, rhs, self.right, self.output);
        let desc = registry::descriptor(self.output);
        unsafe { (desc.binary_aa)(self.op, n, lhs.as_ptr(), rhs.as_ptr(), out.as_mut_ptr()) };
    }

    /// Array-element: `out[i] = op(lhs[i], rhs)`
    pub fn run_ae(&self, n: usize, lhs: &[u8], rhs: Scalar, out: &mut [u8]) {
        debug_assert!(lhs.len() >= n * self.left_entry_size());
        debug_assert!(out.len() >= n * self.output_entry_size());
        let lhs = cast_bytes(n, lhs, self.left, self.output);
        let rhs = cast_scalar(rhs, self.output);
        let desc = registry::descriptor(self.output);
        unsafe {
            (desc.binary_ae)(
                self.op,
                n,
                lhs.as_ptr(),
                rhs.as_bytes().as_ptr(),
                out.as_mut_ptr(),
            )
        };
    }

    /// Element-array: `out[i] = op(lhs, rhs[i])`
    pub fn run_ea(&self, n: usize, lhs: Scalar, rhs: &[u8], out: &mut [u8]) {
        debug_assert!(rhs.len() >= n * self.right_entry_size());
        debug_assert!(out.len() >= n * self.output_entry_size());
        let lhs = cast_scalar(lhs, self.output);
        let rhs = cast_bytes(n, rhs, self.right, self.output);
        let desc = registry::descriptor(self.output);
        unsafe {
            (desc.binary_ea)(
                self.op,
                n,
                lhs.as_bytes().as_ptr(),
                rhs.as_ptr(),
                out.as_mut_ptr(),
            )
        };
    }
}

/// A unary kernel; output dtype equals input dtype
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BulkUnary {
    op: UnaryOp,
    dtype: DType,
}

impl BulkUnary {
    /// Build the kernel handle for `op` over `dtype` operands
    pub fn new(dtype: DType, op: UnaryOp) -> Self {
        Self { op, dtype }
    }

    /// The operation this kernel performs
    #[inline]
    pub fn op(&self) -> UnaryOp {
        self.op
    }

    /// Operand and output dtype
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Bytes per entry
    #[inline]
    pub fn entry_size(&self) -> usize {
        self.dtype.size_in_bytes()
    }

    /// `out[i] = op(input[i])`
    pub fn run_a(&self, n: usize, input: &[u8], out: &mut [u8]) {
        debug_assert!(input.len() >= n * self.entry_size());
        debug_assert!(out.len() >= n * self.entry_size());
        let desc = registry::descriptor(self.dtype);
        unsafe { (desc.unary_a)(self.op, n, input.as_ptr(), out.as_mut_ptr()) };
    }
}

/// An aggregation kernel: a binary fold plus boundary detection
///
/// `find_next` is the streaming routine groupby uses on sorted runs: it
/// reports how many leading elements equal the first one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AggOperate {
    op: BinaryOp,
    dtype: DType,
}

impl AggOperate {
    /// Build the fold handle for `op` over `dtype` elements
    pub fn new(dtype: DType, op: BinaryOp) -> Self {
        Self { op, dtype }
    }

    /// The fold operation
    #[inline]
    pub fn op(&self) -> BinaryOp {
        self.op
    }

    /// Element dtype (input and output)
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Fold all elements of `input` into one scalar
    pub fn run(&self, input: &[u8]) -> Result<Scalar> {
        let size = self.dtype.size_in_bytes();
        let n = input.len() / size;
        if n == 0 {
            return Err(Error::internal("aggregation over an empty run"));
        }
        let mut out = [0u8; 8];
        let desc = registry::descriptor(self.dtype);
        unsafe { (desc.agg)(self.op, n, input.as_ptr(), out.as_mut_ptr()) };
        Ok(Scalar::from_bytes(self.dtype, &out[..size]))
    }

    /// Length of the leading constant prefix of a sorted run
    pub fn find_next(&self, input: &[u8]) -> usize {
        let n = input.len() / self.dtype.size_in_bytes();
        let desc = registry::descriptor(self.dtype);
        unsafe { (desc.find_next)(n, input.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_aa_same_type() {
        let op = BulkOperate::same(DType::F64, BinaryOp::Add);
        let a = bytemuck::cast_slice::<f64, u8>(&[1.0, 2.0]);
        let b = bytemuck::cast_slice::<f64, u8>(&[3.0, 4.0]);
        let mut out = [0.0f64; 2];
        op.run_aa(2, a, b, bytemuck::cast_slice_mut(&mut out));
        assert_eq!(out, [4.0, 6.0]);
    }

    #[test]
    fn test_run_aa_promotes() {
        let op = BulkOperate::new(DType::I32, DType::F64, BinaryOp::Mul);
        assert_eq!(op.output_dtype(), DType::F64);
        let a = bytemuck::cast_slice::<i32, u8>(&[2, 3]);
        let b = bytemuck::cast_slice::<f64, u8>(&[0.5, 2.0]);
        let mut out = [0.0f64; 2];
        op.run_aa(2, a, b, bytemuck::cast_slice_mut(&mut out));
        assert_eq!(out, [1.0, 6.0]);
    }

    #[test]
    fn test_run_ae_and_ea() {
        let op = BulkOperate::same(DType::I32, BinaryOp::Sub);
        let a = bytemuck::cast_slice::<i32, u8>(&[10, 20]);
        let mut out = [0i32; 2];
        op.run_ae(2, a, Scalar::new(1i32), bytemuck::cast_slice_mut(&mut out));
        assert_eq!(out, [9, 19]);
        op.run_ea(2, Scalar::new(100i32), a, bytemuck::cast_slice_mut(&mut out));
        assert_eq!(out, [90, 80]);
    }

    #[test]
    fn test_unary_sqrt() {
        let op = BulkUnary::new(DType::F64, UnaryOp::Sqrt);
        let a = bytemuck::cast_slice::<f64, u8>(&[4.0, 9.0]);
        let mut out = [0.0f64; 2];
        op.run_a(2, a, bytemuck::cast_slice_mut(&mut out));
        assert_eq!(out, [2.0, 3.0]);
    }

    #[test]
    fn test_agg_run() {
        let agg = AggOperate::new(DType::I64, BinaryOp::Add);
        let a = bytemuck::cast_slice::<i64, u8>(&[1, 2, 3, 4]);
        assert_eq!(agg.run(a).unwrap().get::<i64>(), Some(10));
    }

    #[test]
    fn test_agg_find_next() {
        let agg = AggOperate::new(DType::F64, BinaryOp::Add);
        let a = bytemuck::cast_slice::<f64, u8>(&[1.0, 1.0, 2.0]);
        assert_eq!(agg.find_next(a), 2);
    }
}
