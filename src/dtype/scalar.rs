//! Type-erased scalar values
//!
//! A [`Scalar`] carries one element of any supported dtype as raw bytes.
//! It is the value type of constant stores, aggregation results, and vector
//! element access.

use super::{DType, Element};
use std::fmt;

/// One element of a runtime-typed matrix
#[derive(Copy, Clone)]
pub struct Scalar {
    dtype: DType,
    bytes: [u8; 8],
}

impl Scalar {
    /// Create a scalar from a typed Rust value
    pub fn new<T: Element>(v: T) -> Self {
        let mut bytes = [0u8; 8];
        let src = bytemuck::bytes_of(&v);
        bytes[..src.len()].copy_from_slice(src);
        Self {
            dtype: T::DTYPE,
            bytes,
        }
    }

    /// Create a scalar of `dtype` from an f64, converting as a cast would
    pub fn from_f64(dtype: DType, v: f64) -> Self {
        match dtype {
            DType::I32 => Self::new(v as i32),
            DType::I64 => Self::new(v as i64),
            DType::F32 => Self::new(v as f32),
            DType::F64 => Self::new(v),
        }
    }

    /// Reinterpret raw bytes as a scalar of `dtype`
    ///
    /// `raw` must hold exactly `dtype.size_in_bytes()` bytes.
    pub fn from_bytes(dtype: DType, raw: &[u8]) -> Self {
        debug_assert_eq!(raw.len(), dtype.size_in_bytes());
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        Self { dtype, bytes }
    }

    /// The scalar's dtype
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The scalar's raw bytes, `dtype.size_in_bytes()` long
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.dtype.size_in_bytes()]
    }

    /// Read back as a typed value
    ///
    /// Returns `None` when `T` doesn't match the scalar's dtype.
    pub fn get<T: Element>(&self) -> Option<T> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(self.as_bytes()))
    }

    /// The value widened to f64
    pub fn to_f64(&self) -> f64 {
        match self.dtype {
            DType::I32 => self.get::<i32>().unwrap() as f64,
            DType::I64 => self.get::<i64>().unwrap() as f64,
            DType::F32 => self.get::<f32>().unwrap() as f64,
            DType::F64 => self.get::<f64>().unwrap(),
        }
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({}: {})", self.dtype, self.to_f64())
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.as_bytes() == other.as_bytes()
    }
}
