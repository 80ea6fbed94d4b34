//! Bulk kernels over contiguous element runs
//!
//! Kernels are generic over [`Element`] and are selected once per portion
//! through the dtype dispatch; the inner loops are monomorphized. The
//! type-erased tables that the façades consume live in [`bulk`] and
//! [`registry`].

mod bulk;
pub mod registry;

pub use bulk::{AggOperate, BulkOperate, BulkUnary};

use crate::dtype::Element;

/// Binary element-wise operations
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Element-wise minimum
    Min,
    /// Element-wise maximum
    Max,
    /// Exponentiation
    Pow,
}

impl BinaryOp {
    /// Short symbol used in lazy-node names
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Min => "min",
            Self::Max => "max",
            Self::Pow => "^",
        }
    }
}

/// Unary element-wise operations
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Square root
    Sqrt,
    /// Negation
    Neg,
    /// Absolute value
    Abs,
}

/// Dispatch a runtime dtype to a concrete element type
///
/// Expands the body once per supported dtype with `$T` bound to the matching
/// Rust type. Dispatch happens once per portion; the expanded body runs a
/// monomorphized loop.
macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block) => {
        match $dtype {
            $crate::dtype::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::dtype::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use dispatch_dtype;

// ============================================================================
// Binary kernels
// ============================================================================

/// Array-array binary kernel
///
/// # Safety
/// `a`, `b` must point to `n` readable elements of `T`; `out` to `n`
/// writable elements. `out` may alias either input.
pub(crate) unsafe fn binary_aa<T: Element>(
    op: BinaryOp,
    n: usize,
    a: *const u8,
    b: *const u8,
    out: *mut u8,
) {
    let a = a as *const T;
    let b = b as *const T;
    let out = out as *mut T;
    macro_rules! run {
        ($f:ident) => {
            for i in 0..n {
                unsafe { out.add(i).write_unaligned(a.add(i).read_unaligned().$f(b.add(i).read_unaligned())) };
            }
        };
    }
    match op {
        BinaryOp::Add => run!(add),
        BinaryOp::Sub => run!(sub),
        BinaryOp::Mul => run!(mul),
        BinaryOp::Div => run!(div),
        BinaryOp::Min => run!(min_elem),
        BinaryOp::Max => run!(max_elem),
        BinaryOp::Pow => run!(pow_elem),
    }
}

/// Array-element binary kernel; the right operand is one scalar
///
/// # Safety
/// `a` must point to `n` elements, `e` to one element, `out` to `n`
/// writable elements.
pub(crate) unsafe fn binary_ae<T: Element>(
    op: BinaryOp,
    n: usize,
    a: *const u8,
    e: *const u8,
    out: *mut u8,
) {
    let a = a as *const T;
    let e = unsafe { (e as *const T).read_unaligned() };
    let out = out as *mut T;
    macro_rules! run {
        ($f:ident) => {
            for i in 0..n {
                unsafe { out.add(i).write_unaligned(a.add(i).read_unaligned().$f(e)) };
            }
        };
    }
    match op {
        BinaryOp::Add => run!(add),
        BinaryOp::Sub => run!(sub),
        BinaryOp::Mul => run!(mul),
        BinaryOp::Div => run!(div),
        BinaryOp::Min => run!(min_elem),
        BinaryOp::Max => run!(max_elem),
        BinaryOp::Pow => run!(pow_elem),
    }
}

/// Element-array binary kernel; the left operand is one scalar
///
/// # Safety
/// `e` must point to one element, `b` to `n` elements, `out` to `n`
/// writable elements.
pub(crate) unsafe fn binary_ea<T: Element>(
    op: BinaryOp,
    n: usize,
    e: *const u8,
    b: *const u8,
    out: *mut u8,
) {
    let e = unsafe { (e as *const T).read_unaligned() };
    let b = b as *const T;
    let out = out as *mut T;
    macro_rules! run {
        ($f:ident) => {
            for i in 0..n {
                unsafe { out.add(i).write_unaligned(e.$f(b.add(i).read_unaligned())) };
            }
        };
    }
    match op {
        BinaryOp::Add => run!(add),
        BinaryOp::Sub => run!(sub),
        BinaryOp::Mul => run!(mul),
        BinaryOp::Div => run!(div),
        BinaryOp::Min => run!(min_elem),
        BinaryOp::Max => run!(max_elem),
        BinaryOp::Pow => run!(pow_elem),
    }
}

// ============================================================================
// Unary kernels
// ============================================================================

/// Unary element-wise kernel
///
/// # Safety
/// `a` must point to `n` elements, `out` to `n` writable elements; they may
/// alias.
pub(crate) unsafe fn unary_a<T: Element>(op: UnaryOp, n: usize, a: *const u8, out: *mut u8) {
    let a = a as *const T;
    let out = out as *mut T;
    match op {
        UnaryOp::Sqrt => {
            for i in 0..n {
                unsafe {
                    out.add(i)
                        .write_unaligned(T::from_f64(a.add(i).read_unaligned().to_f64().sqrt()))
                };
            }
        }
        UnaryOp::Neg => {
            for i in 0..n {
                unsafe { out.add(i).write_unaligned(T::zero().sub(a.add(i).read_unaligned())) };
            }
        }
        UnaryOp::Abs => {
            for i in 0..n {
                unsafe {
                    let v = a.add(i).read_unaligned();
                    out.add(i)
                        .write_unaligned(if v < T::zero() { T::zero().sub(v) } else { v });
                }
            }
        }
    }
}

// ============================================================================
// Aggregation kernels
// ============================================================================

/// Fold `n` elements with a binary op into one scalar
///
/// # Safety
/// `a` must point to `n >= 1` elements; `out` to one writable element.
pub(crate) unsafe fn agg_fold<T: Element>(op: BinaryOp, n: usize, a: *const u8, out: *mut u8) {
    debug_assert!(n >= 1);
    let a = a as *const T;
    let mut acc = unsafe { a.read_unaligned() };
    macro_rules! run {
        ($f:ident) => {
            for i in 1..n {
                acc = acc.$f(unsafe { a.add(i).read_unaligned() });
            }
        };
    }
    match op {
        BinaryOp::Add => run!(add),
        BinaryOp::Sub => run!(sub),
        BinaryOp::Mul => run!(mul),
        BinaryOp::Div => run!(div),
        BinaryOp::Min => run!(min_elem),
        BinaryOp::Max => run!(max_elem),
        BinaryOp::Pow => run!(pow_elem),
    }
    unsafe { (out as *mut T).write_unaligned(acc) };
}

/// Length of the leading constant prefix of a sorted run
///
/// # Safety
/// `a` must point to `n` readable elements.
pub(crate) unsafe fn find_next_run<T: Element>(n: usize, a: *const u8) -> usize {
    if n == 0 {
        return 0;
    }
    let a = a as *const T;
    let first = unsafe { a.read_unaligned() };
    let mut i = 1;
    while i < n && unsafe { a.add(i).read_unaligned() } == first {
        i += 1;
    }
    i
}

// ============================================================================
// Conversion kernel
// ============================================================================

/// Cast `n` elements from `L` to `O`
///
/// # Safety
/// `a` must point to `n` elements of `L`, `out` to `n` writable elements of
/// `O`; the buffers must not overlap.
pub(crate) unsafe fn cast_run<L: Element, O: Element>(n: usize, a: *const u8, out: *mut u8) {
    let a = a as *const L;
    let out = out as *mut O;
    for i in 0..n {
        unsafe { out.add(i).write_unaligned(O::from_f64(a.add(i).read_unaligned().to_f64())) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_aa_add() {
        let a = [1.0f64, 2.0, 3.0];
        let b = [10.0f64, 20.0, 30.0];
        let mut out = [0.0f64; 3];
        unsafe {
            binary_aa::<f64>(
                BinaryOp::Add,
                3,
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
            );
        }
        assert_eq!(out, [11.0, 22.0, 33.0]);
    }

    #[test]
    fn test_binary_ae_scalar() {
        let a = [1i32, 2, 3];
        let e = 5i32;
        let mut out = [0i32; 3];
        unsafe {
            binary_ae::<i32>(
                BinaryOp::Mul,
                3,
                a.as_ptr() as *const u8,
                &e as *const i32 as *const u8,
                out.as_mut_ptr() as *mut u8,
            );
        }
        assert_eq!(out, [5, 10, 15]);
    }

    #[test]
    fn test_agg_fold_min() {
        let a = [4i64, -2, 9, 0];
        let mut out = 0i64;
        unsafe {
            agg_fold::<i64>(
                BinaryOp::Min,
                4,
                a.as_ptr() as *const u8,
                &mut out as *mut i64 as *mut u8,
            );
        }
        assert_eq!(out, -2);
    }

    #[test]
    fn test_find_next_run() {
        let a = [7i32, 7, 7, 8, 9];
        let len = unsafe { find_next_run::<i32>(5, a.as_ptr() as *const u8) };
        assert_eq!(len, 3);
        let tail = unsafe { find_next_run::<i32>(2, a[3..].as_ptr() as *const u8) };
        assert_eq!(tail, 1);
    }

    #[test]
    fn test_cast_run() {
        let a = [1i32, -2, 3];
        let mut out = [0.0f64; 3];
        unsafe {
            cast_run::<i32, f64>(3, a.as_ptr() as *const u8, out.as_mut_ptr() as *mut u8);
        }
        assert_eq!(out, [1.0, -2.0, 3.0]);
    }
}
