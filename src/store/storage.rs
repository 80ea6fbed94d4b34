//! Storage: reference-counted byte buffers
//!
//! `Storage` wraps a raw allocation with reference counting, enabling
//! zero-copy views (transpose, slices, portion extraction) that share the
//! underlying buffer. Memory is deallocated when the last reference drops.

use crate::dtype::Element;
use crate::error::{Error, Result};
use std::alloc;
use std::sync::Arc;

const STORAGE_ALIGN: usize = 8;

struct StorageInner {
    ptr: *mut u8,
    len: usize,
}

// The raw pointer is uniquely owned by the inner struct; concurrent access
// to disjoint regions is coordinated by the portion scheduler.
unsafe impl Send for StorageInner {}
unsafe impl Sync for StorageInner {}

impl Drop for StorageInner {
    fn drop(&mut self) {
        if self.len > 0 {
            let layout = alloc::Layout::from_size_align(self.len, STORAGE_ALIGN)
                .expect("layout was validated at allocation");
            unsafe { alloc::dealloc(self.ptr, layout) };
        }
    }
}

/// A shared, 8-byte aligned byte buffer
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self {
                inner: Arc::new(StorageInner {
                    ptr: std::ptr::null_mut(),
                    len: 0,
                }),
            });
        }
        let layout = alloc::Layout::from_size_align(len, STORAGE_ALIGN)
            .map_err(|_| Error::AllocationFailed { size: len })?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::AllocationFailed { size: len });
        }
        Ok(Self {
            inner: Arc::new(StorageInner { ptr, len }),
        })
    }

    /// Allocate a buffer holding a copy of `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let storage = Self::zeroed(data.len())?;
        if !data.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), storage.inner.ptr, data.len());
            }
        }
        Ok(storage)
    }

    /// Allocate a buffer holding a copy of a typed slice
    pub fn from_slice<T: Element>(data: &[T]) -> Result<Self> {
        Self::from_bytes(bytemuck::cast_slice(data))
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Raw pointer to the first byte
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.ptr
    }

    /// Raw mutable pointer to the first byte
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.ptr
    }

    /// View the whole buffer
    ///
    /// # Safety
    /// No mutable access to the same bytes may exist for the borrow's
    /// lifetime.
    pub unsafe fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.inner.ptr, self.inner.len) }
    }

    /// Mutably view the whole buffer
    ///
    /// # Safety
    /// The caller must guarantee exclusive access to the bytes it writes;
    /// the scheduler upholds this by handing out disjoint portions.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.inner.ptr, self.inner.len) }
    }

    /// Whether this is the only reference to the buffer
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }
}

impl Clone for Storage {
    /// Clone increments the reference count (zero-copy)
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("ptr", &format!("{:p}", self.inner.ptr))
            .field("len", &self.inner.len)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed() {
        let s = Storage::zeroed(64).unwrap();
        assert_eq!(s.len(), 64);
        assert!(unsafe { s.bytes() }.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let s = Storage::from_slice(&[1.0f64, 2.0, 3.0]).unwrap();
        assert_eq!(s.len(), 24);
        let back: &[f64] = bytemuck::cast_slice(unsafe { s.bytes() });
        assert_eq!(back, &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shared_clone() {
        let s = Storage::zeroed(8).unwrap();
        assert!(s.is_unique());
        let t = s.clone();
        assert!(!t.is_unique());
        assert_eq!(s.as_ptr(), t.as_ptr());
    }

    #[test]
    fn test_empty() {
        let s = Storage::zeroed(0).unwrap();
        assert!(s.is_empty());
    }
}
