//! Element trait for mapping Rust types to DType

use super::DType;
use bytemuck::{Pod, Zeroable};

/// Trait for Rust scalar types that can be matrix elements
///
/// This trait connects Rust's type system to blockmat's runtime dtype
/// system. Kernels are monomorphized over `Element` and selected once per
/// portion through the dtype dispatch.
pub trait Element:
    Copy + Clone + Send + Sync + PartialOrd + PartialEq + Pod + Zeroable + 'static
{
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Convert to f64 for generic numeric operations
    fn to_f64(self) -> f64;

    /// Convert from f64
    fn from_f64(v: f64) -> Self;

    /// Zero value
    fn zero() -> Self;

    /// One value
    fn one() -> Self;

    /// Element-wise addition
    fn add(self, o: Self) -> Self;

    /// Element-wise subtraction
    fn sub(self, o: Self) -> Self;

    /// Element-wise multiplication
    fn mul(self, o: Self) -> Self;

    /// Element-wise division
    fn div(self, o: Self) -> Self;

    /// The smaller of two elements
    #[inline]
    fn min_elem(self, o: Self) -> Self {
        if o < self { o } else { self }
    }

    /// The larger of two elements
    #[inline]
    fn max_elem(self, o: Self) -> Self {
        if o > self { o } else { self }
    }

    /// Exponentiation; routed through f64 like the other transcendental ops
    #[inline]
    fn pow_elem(self, o: Self) -> Self {
        Self::from_f64(self.to_f64().powf(o.to_f64()))
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn add(self, o: Self) -> Self {
        self + o
    }

    #[inline]
    fn sub(self, o: Self) -> Self {
        self - o
    }

    #[inline]
    fn mul(self, o: Self) -> Self {
        self * o
    }

    #[inline]
    fn div(self, o: Self) -> Self {
        self / o
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn add(self, o: Self) -> Self {
        self + o
    }

    #[inline]
    fn sub(self, o: Self) -> Self {
        self - o
    }

    #[inline]
    fn mul(self, o: Self) -> Self {
        self * o
    }

    #[inline]
    fn div(self, o: Self) -> Self {
        self / o
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::I64;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as i64
    }

    #[inline]
    fn zero() -> Self {
        0
    }

    #[inline]
    fn one() -> Self {
        1
    }

    #[inline]
    fn add(self, o: Self) -> Self {
        self.wrapping_add(o)
    }

    #[inline]
    fn sub(self, o: Self) -> Self {
        self.wrapping_sub(o)
    }

    #[inline]
    fn mul(self, o: Self) -> Self {
        self.wrapping_mul(o)
    }

    #[inline]
    fn div(self, o: Self) -> Self {
        self / o
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as i32
    }

    #[inline]
    fn zero() -> Self {
        0
    }

    #[inline]
    fn one() -> Self {
        1
    }

    #[inline]
    fn add(self, o: Self) -> Self {
        self.wrapping_add(o)
    }

    #[inline]
    fn sub(self, o: Self) -> Self {
        self.wrapping_sub(o)
    }

    #[inline]
    fn mul(self, o: Self) -> Self {
        self.wrapping_mul(o)
    }

    #[inline]
    fn div(self, o: Self) -> Self {
        self / o
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_dtype_binding() {
        assert_eq!(<i32 as Element>::DTYPE, DType::I32);
        assert_eq!(<f64 as Element>::DTYPE, DType::F64);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(3i32.min_elem(5), 3);
        assert_eq!(3i32.max_elem(5), 5);
        assert_eq!(2.5f64.max_elem(-1.0), 2.5);
    }

    #[test]
    fn test_pow_int_roundtrip() {
        assert_eq!(2i64.pow_elem(10), 1024);
    }
}
