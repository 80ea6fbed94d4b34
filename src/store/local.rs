//! Local matrix stores: portion views
//!
//! A `LocalStore` references a rectangular sub-region of some matrix with a
//! fixed layout. It is the unit the scheduler hands to portion operators:
//! inputs arrive as (possibly zero-copy) local stores, outputs are freshly
//! allocated exclusive ones. Within its own buffer a local store is always
//! dense: row stride `ncol` for row-major, column stride `nrow` for
//! column-major.

use super::storage::Storage;
use super::Layout;
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::kernel::dispatch_dtype;

/// A rectangular portion of a matrix store
#[derive(Clone)]
pub struct LocalStore {
    storage: Storage,
    /// Byte offset of element (0, 0) within the storage
    offset: usize,
    start_row: usize,
    start_col: usize,
    nrow: usize,
    ncol: usize,
    layout: Layout,
    dtype: DType,
    /// Freshly allocated buffers may be written; shared views may not
    exclusive: bool,
}

impl LocalStore {
    /// Allocate an exclusive, zeroed portion buffer
    pub fn new_owned(
        start_row: usize,
        start_col: usize,
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
    ) -> Result<Self> {
        let storage = Storage::zeroed(nrow * ncol * dtype.size_in_bytes())?;
        Ok(Self {
            storage,
            offset: 0,
            start_row,
            start_col,
            nrow,
            ncol,
            layout,
            dtype,
            exclusive: true,
        })
    }

    /// Wrap a shared region of an existing storage (zero-copy, read-only)
    pub fn from_storage(
        storage: Storage,
        offset: usize,
        start_row: usize,
        start_col: usize,
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
    ) -> Self {
        debug_assert!(offset + nrow * ncol * dtype.size_in_bytes() <= storage.len());
        Self {
            storage,
            offset,
            start_row,
            start_col,
            nrow,
            ncol,
            layout,
            dtype,
            exclusive: false,
        }
    }

    /// Global row of element (0, 0)
    #[inline]
    pub fn start_row(&self) -> usize {
        self.start_row
    }

    /// Global column of element (0, 0)
    #[inline]
    pub fn start_col(&self) -> usize {
        self.start_col
    }

    /// Number of rows in the portion
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.nrow
    }

    /// Number of columns in the portion
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.ncol
    }

    /// Physical element order within the portion buffer
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.nrow * self.ncol
    }

    /// Whether the portion holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The same portion with different global coordinates
    pub(crate) fn with_start(&self, start_row: usize, start_col: usize) -> Self {
        let mut p = self.clone();
        p.start_row = start_row;
        p.start_col = start_col;
        p
    }

    /// The portion bytes, dense in this portion's layout
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len() * self.dtype.size_in_bytes();
        unsafe { &self.storage.bytes()[self.offset..self.offset + len] }
    }

    /// Mutable portion bytes; only exclusive buffers may be written
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.exclusive, "writing a shared portion view");
        let len = self.len() * self.dtype.size_in_bytes();
        unsafe { &mut self.storage.bytes_mut()[self.offset..self.offset + len] }
    }

    /// Element offset (in elements, not bytes) of `(i, j)` within the buffer
    #[inline]
    pub fn elem_index(&self, i: usize, j: usize) -> usize {
        match self.layout {
            Layout::Row => i * self.ncol + j,
            Layout::Col => j * self.nrow + i,
        }
    }

    /// Read element `(i, j)`
    pub fn get_scalar(&self, i: usize, j: usize) -> Scalar {
        debug_assert!(i < self.nrow && j < self.ncol);
        let size = self.dtype.size_in_bytes();
        let off = self.elem_index(i, j) * size;
        Scalar::from_bytes(self.dtype, &self.as_bytes()[off..off + size])
    }

    /// Read element `(i, j)` widened to f64
    pub fn get_f64(&self, i: usize, j: usize) -> f64 {
        self.get_scalar(i, j).to_f64()
    }

    /// Write element `(i, j)`
    pub fn set_scalar(&mut self, i: usize, j: usize, value: Scalar) {
        debug_assert!(i < self.nrow && j < self.ncol);
        debug_assert_eq!(value.dtype(), self.dtype);
        let size = self.dtype.size_in_bytes();
        let off = self.elem_index(i, j) * size;
        self.as_bytes_mut()[off..off + size].copy_from_slice(value.as_bytes());
    }

    /// Zero-copy transposed view of this portion
    pub fn transpose(&self) -> LocalStore {
        Self {
            storage: self.storage.clone(),
            offset: self.offset,
            start_row: self.start_col,
            start_col: self.start_row,
            nrow: self.ncol,
            ncol: self.nrow,
            layout: self.layout.flip(),
            dtype: self.dtype,
            exclusive: false,
        }
    }

    /// Fill the whole portion with one value
    pub fn fill_scalar(&mut self, value: Scalar) {
        debug_assert_eq!(value.dtype(), self.dtype);
        let size = self.dtype.size_in_bytes();
        let n = self.len();
        let bytes = self.as_bytes_mut();
        for i in 0..n {
            bytes[i * size..(i + 1) * size].copy_from_slice(value.as_bytes());
        }
    }

    /// Overwrite this portion with `src`, converting layout if needed
    ///
    /// The two portions must have the same shape and dtype.
    pub fn copy_from(&mut self, src: &LocalStore) -> Result<()> {
        if self.nrow != src.nrow || self.ncol != src.ncol {
            return Err(Error::shape_mismatch(
                (self.nrow, self.ncol),
                (src.nrow, src.ncol),
            ));
        }
        if self.dtype != src.dtype {
            return Err(Error::internal("portion copy across dtypes"));
        }
        if self.layout == src.layout {
            let src_bytes = src.as_bytes().to_vec();
            self.as_bytes_mut().copy_from_slice(&src_bytes);
            return Ok(());
        }
        self.copy_transposed(src);
        Ok(())
    }

    fn copy_transposed(&mut self, src: &LocalStore) {
        let (nrow, ncol) = (self.nrow, self.ncol);
        dispatch_dtype!(self.dtype, T => {
            let src_ptr = src.as_bytes().as_ptr() as *const T;
            // src and self never share a buffer here: self is exclusive.
            let dst = self.as_bytes_mut().as_mut_ptr() as *mut T;
            for i in 0..nrow {
                for j in 0..ncol {
                    let s = src.elem_index(i, j);
                    let d = self.elem_index(i, j);
                    unsafe { dst.add(d).write(src_ptr.add(s).read()) };
                }
            }
        });
    }

    /// Copy `src` into the sub-rectangle at `(dest_row, dest_col)` of this
    /// portion (coordinates local to this portion)
    pub fn copy_region_from(
        &mut self,
        src: &LocalStore,
        dest_row: usize,
        dest_col: usize,
    ) -> Result<()> {
        if dest_row + src.nrow > self.nrow || dest_col + src.ncol > self.ncol {
            return Err(Error::shape_mismatch(
                (self.nrow, self.ncol),
                (dest_row + src.nrow, dest_col + src.ncol),
            ));
        }
        if self.dtype != src.dtype {
            return Err(Error::internal("portion copy across dtypes"));
        }
        let size = self.dtype.size_in_bytes();
        if self.layout == src.layout {
            // Line-wise copies along the contiguous axis.
            let src_bytes = src.as_bytes();
            match self.layout {
                Layout::Row => {
                    for i in 0..src.nrow {
                        let s = src.elem_index(i, 0) * size;
                        let d = self.elem_index(dest_row + i, dest_col) * size;
                        let line = src.ncol * size;
                        let src_line = src_bytes[s..s + line].to_vec();
                        self.as_bytes_mut()[d..d + line].copy_from_slice(&src_line);
                    }
                }
                Layout::Col => {
                    for j in 0..src.ncol {
                        let s = src.elem_index(0, j) * size;
                        let d = self.elem_index(dest_row, dest_col + j) * size;
                        let line = src.nrow * size;
                        let src_line = src_bytes[s..s + line].to_vec();
                        self.as_bytes_mut()[d..d + line].copy_from_slice(&src_line);
                    }
                }
            }
        } else {
            let (snrow, sncol) = (src.nrow, src.ncol);
            dispatch_dtype!(self.dtype, T => {
                let src_ptr = src.as_bytes().as_ptr() as *const T;
                let dst = self.as_bytes_mut().as_mut_ptr() as *mut T;
                for i in 0..snrow {
                    for j in 0..sncol {
                        let s = src.elem_index(i, j);
                        let d = self.elem_index(dest_row + i, dest_col + j);
                        unsafe { dst.add(d).write(src_ptr.add(s).read()) };
                    }
                }
            });
        }
        Ok(())
    }

    /// An exclusive copy of the sub-rectangle at `(rel_row, rel_col)`
    pub fn sub_portion(
        &self,
        rel_row: usize,
        rel_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        if rel_row + num_rows > self.nrow || rel_col + num_cols > self.ncol {
            return Err(Error::shape_mismatch(
                (self.nrow, self.ncol),
                (rel_row + num_rows, rel_col + num_cols),
            ));
        }
        let mut out = LocalStore::new_owned(
            self.start_row + rel_row,
            self.start_col + rel_col,
            num_rows,
            num_cols,
            self.layout,
            self.dtype,
        )?;
        let size = self.dtype.size_in_bytes();
        let src_bytes = self.as_bytes();
        {
            let out_bytes = out.as_bytes_mut();
            match self.layout {
                Layout::Row => {
                    for i in 0..num_rows {
                        let s = self.elem_index(rel_row + i, rel_col) * size;
                        let line = num_cols * size;
                        out_bytes[i * line..(i + 1) * line].copy_from_slice(&src_bytes[s..s + line]);
                    }
                }
                Layout::Col => {
                    for j in 0..num_cols {
                        let s = self.elem_index(rel_row, rel_col + j) * size;
                        let line = num_rows * size;
                        out_bytes[j * line..(j + 1) * line].copy_from_slice(&src_bytes[s..s + line]);
                    }
                }
            }
        }
        Ok(out)
    }

    /// An exclusive copy of this portion in the requested layout
    pub fn to_layout(&self, layout: Layout) -> Result<LocalStore> {
        let mut out = LocalStore::new_owned(
            self.start_row,
            self.start_col,
            self.nrow,
            self.ncol,
            layout,
            self.dtype,
        )?;
        out.copy_from(self)?;
        Ok(out)
    }

    /// The underlying shared storage and the byte offset of element (0, 0)
    pub(crate) fn raw_parts(&self) -> (&Storage, usize) {
        (&self.storage, self.offset)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("start", &(self.start_row, self.start_col))
            .field("shape", &(self.nrow, self.ncol))
            .field("layout", &self.layout)
            .field("dtype", &self.dtype)
            .finish()
    }
}
