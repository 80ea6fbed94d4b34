//! Element-type descriptor registry
//!
//! Every dtype resolves to a [`TypeDescriptor`]: its entry size plus the
//! kernel table the bulk operators dispatch through. The built-in dtypes are
//! seeded from the monomorphized kernels in this crate; callers may replace
//! a table with [`register`] (e.g. to plug in SIMD kernels).

use super::{agg_fold, binary_aa, binary_ae, binary_ea, find_next_run, unary_a};
use super::{BinaryOp, UnaryOp};
use crate::dtype::{DType, Element};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Kernel table for one element type
#[derive(Copy, Clone)]
pub struct TypeDescriptor {
    /// Bytes per element
    pub size: usize,
    /// Array-array binary kernel
    pub binary_aa: unsafe fn(BinaryOp, usize, *const u8, *const u8, *mut u8),
    /// Array-element binary kernel
    pub binary_ae: unsafe fn(BinaryOp, usize, *const u8, *const u8, *mut u8),
    /// Element-array binary kernel
    pub binary_ea: unsafe fn(BinaryOp, usize, *const u8, *const u8, *mut u8),
    /// Unary kernel
    pub unary_a: unsafe fn(UnaryOp, usize, *const u8, *mut u8),
    /// Aggregation fold kernel
    pub agg: unsafe fn(BinaryOp, usize, *const u8, *mut u8),
    /// Leading-constant-prefix routine for sorted runs
    pub find_next: unsafe fn(usize, *const u8) -> usize,
}

fn builtin<T: Element>() -> TypeDescriptor {
    TypeDescriptor {
        size: std::mem::size_of::<T>(),
        binary_aa: binary_aa::<T>,
        binary_ae: binary_ae::<T>,
        binary_ea: binary_ea::<T>,
        unary_a: unary_a::<T>,
        agg: agg_fold::<T>,
        find_next: find_next_run::<T>,
    }
}

fn registry() -> &'static RwLock<HashMap<DType, TypeDescriptor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<DType, TypeDescriptor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(DType::I32, builtin::<i32>());
        map.insert(DType::I64, builtin::<i64>());
        map.insert(DType::F32, builtin::<f32>());
        map.insert(DType::F64, builtin::<f64>());
        RwLock::new(map)
    })
}

/// Look up the kernel table for `dtype`
pub fn descriptor(dtype: DType) -> TypeDescriptor {
    *registry()
        .read()
        .get(&dtype)
        .expect("all dtypes are seeded at startup")
}

/// Replace the kernel table for `dtype`
///
/// The descriptor must be complete; partial overrides are not supported.
/// Takes effect for all subsequent bulk-operator runs.
pub fn register(dtype: DType, desc: TypeDescriptor) {
    registry().write().insert(dtype, desc);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_sizes() {
        assert_eq!(descriptor(DType::I32).size, 4);
        assert_eq!(descriptor(DType::F64).size, 8);
    }

    #[test]
    fn test_builtin_dispatch() {
        let desc = descriptor(DType::I32);
        let a = [1i32, 2];
        let b = [3i32, 4];
        let mut out = [0i32; 2];
        unsafe {
            (desc.binary_aa)(
                BinaryOp::Add,
                2,
                a.as_ptr() as *const u8,
                b.as_ptr() as *const u8,
                out.as_mut_ptr() as *mut u8,
            );
        }
        assert_eq!(out, [4, 6]);
    }
}
