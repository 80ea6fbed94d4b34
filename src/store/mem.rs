//! Contiguous in-memory matrix store

use super::local::LocalStore;
use super::storage::Storage;
use super::{check_portion_bounds, Layout, MatrixStore, SetOperate};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::kernel::dispatch_dtype;
use crate::scheduler;
use rayon::prelude::*;
use std::sync::Arc;

/// Parallelize `set_data` only past this many lines.
const PAR_LINE_THRESHOLD: usize = 64;

/// A matrix stored in one contiguous allocation
pub struct MemStore {
    storage: Storage,
    nrow: usize,
    ncol: usize,
    layout: Layout,
    dtype: DType,
}

impl MemStore {
    /// Allocate a zeroed matrix
    pub fn new(nrow: usize, ncol: usize, layout: Layout, dtype: DType) -> Result<Arc<Self>> {
        let storage = Storage::zeroed(nrow * ncol * dtype.size_in_bytes())?;
        Ok(Arc::new(Self {
            storage,
            nrow,
            ncol,
            layout,
            dtype,
        }))
    }

    /// Build a matrix from a typed slice in the given layout
    ///
    /// `data` is interpreted in the layout's element order.
    pub fn from_slice<T: Element>(
        data: &[T],
        nrow: usize,
        ncol: usize,
        layout: Layout,
    ) -> Result<Arc<Self>> {
        if data.len() != nrow * ncol {
            return Err(Error::shape_mismatch((nrow, ncol), (data.len(), 1)));
        }
        let storage = Storage::from_slice(data)?;
        Ok(Arc::new(Self {
            storage,
            nrow,
            ncol,
            layout,
            dtype: T::DTYPE,
        }))
    }

    /// Materialize a portion into a store of its own
    pub fn from_portion(portion: &LocalStore) -> Result<Arc<Self>> {
        let store = Self::new(
            portion.num_rows(),
            portion.num_cols(),
            portion.layout(),
            portion.dtype(),
        )?;
        store.write_portion(portion, 0, 0)?;
        Ok(store)
    }

    /// Wrap an existing storage buffer
    pub(crate) fn from_raw(
        storage: Storage,
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
    ) -> Result<Arc<Self>> {
        if storage.len() < nrow * ncol * dtype.size_in_bytes() {
            return Err(Error::internal("storage too small for shape"));
        }
        Ok(Arc::new(Self {
            storage,
            nrow,
            ncol,
            layout,
            dtype,
        }))
    }

    /// The shared backing buffer
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Typed transpose, for callers that need the concrete store back
    ///
    /// A row-major M x N buffer is byte-identical to a column-major N x M
    /// one, so transposition is a relabeling.
    pub fn transpose_mem(self: &Arc<Self>) -> Arc<MemStore> {
        Arc::new(MemStore {
            storage: self.storage.clone(),
            nrow: self.ncol,
            ncol: self.nrow,
            layout: self.layout.flip(),
            dtype: self.dtype,
        })
    }

    fn elem_offset(&self, i: usize, j: usize) -> usize {
        match self.layout {
            Layout::Row => i * self.ncol + j,
            Layout::Col => j * self.nrow + i,
        }
    }
}

impl MatrixStore for MemStore {
    fn num_rows(&self) -> usize {
        self.nrow
    }

    fn num_cols(&self) -> usize {
        self.ncol
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn store_layout(&self) -> Layout {
        self.layout
    }

    fn is_in_mem(&self) -> bool {
        true
    }

    fn get_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        check_portion_bounds(self.nrow, self.ncol, start_row, start_col, num_rows, num_cols)?;
        let size = self.dtype.size_in_bytes();

        // Full-width (or full-height) requests are contiguous slabs and are
        // served zero-copy.
        match self.layout {
            Layout::Row if num_cols == self.ncol => {
                let offset = start_row * self.ncol * size;
                return Ok(LocalStore::from_storage(
                    self.storage.clone(),
                    offset,
                    start_row,
                    start_col,
                    num_rows,
                    num_cols,
                    Layout::Row,
                    self.dtype,
                ));
            }
            Layout::Col if num_rows == self.nrow => {
                let offset = start_col * self.nrow * size;
                return Ok(LocalStore::from_storage(
                    self.storage.clone(),
                    offset,
                    start_row,
                    start_col,
                    num_rows,
                    num_cols,
                    Layout::Col,
                    self.dtype,
                ));
            }
            _ => {}
        }

        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.dtype,
        )?;
        let src = unsafe { self.storage.bytes() };
        {
            let dst = out.as_bytes_mut();
            match self.layout {
                Layout::Row => {
                    let line = num_cols * size;
                    for i in 0..num_rows {
                        let s = self.elem_offset(start_row + i, start_col) * size;
                        dst[i * line..(i + 1) * line].copy_from_slice(&src[s..s + line]);
                    }
                }
                Layout::Col => {
                    let line = num_rows * size;
                    for j in 0..num_cols {
                        let s = self.elem_offset(start_row, start_col + j) * size;
                        dst[j * line..(j + 1) * line].copy_from_slice(&src[s..s + line]);
                    }
                }
            }
        }
        Ok(out)
    }

    fn write_portion(&self, portion: &LocalStore, dest_row: usize, dest_col: usize) -> Result<()> {
        check_portion_bounds(
            self.nrow,
            self.ncol,
            dest_row,
            dest_col,
            portion.num_rows(),
            portion.num_cols(),
        )?;
        if portion.dtype() != self.dtype {
            return Err(Error::internal("portion write across dtypes"));
        }
        let size = self.dtype.size_in_bytes();
        let src = portion.as_bytes();
        // Writers of disjoint regions may run concurrently; the scheduler
        // never hands out overlapping destinations.
        let dst = unsafe { self.storage.bytes_mut() };
        if portion.layout() == self.layout {
            match self.layout {
                Layout::Row => {
                    let line = portion.num_cols() * size;
                    for i in 0..portion.num_rows() {
                        let d = self.elem_offset(dest_row + i, dest_col) * size;
                        let s = portion.elem_index(i, 0) * size;
                        dst[d..d + line].copy_from_slice(&src[s..s + line]);
                    }
                }
                Layout::Col => {
                    let line = portion.num_rows() * size;
                    for j in 0..portion.num_cols() {
                        let d = self.elem_offset(dest_row, dest_col + j) * size;
                        let s = portion.elem_index(0, j) * size;
                        dst[d..d + line].copy_from_slice(&src[s..s + line]);
                    }
                }
            }
        } else {
            let (nrow, ncol) = (portion.num_rows(), portion.num_cols());
            dispatch_dtype!(self.dtype, T => {
                let src_ptr = src.as_ptr() as *const T;
                let dst_ptr = dst.as_mut_ptr() as *mut T;
                for i in 0..nrow {
                    for j in 0..ncol {
                        let s = portion.elem_index(i, j);
                        let d = self.elem_offset(dest_row + i, dest_col + j);
                        unsafe { dst_ptr.add(d).write(src_ptr.add(s).read()) };
                    }
                }
            });
        }
        Ok(())
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        self.transpose_mem()
    }

    fn set_data(&self, op: &dyn SetOperate) -> Result<()> {
        if op.dtype() != self.dtype {
            return Err(Error::incompatible_operator(
                "set_data",
                format!("initializer writes {}, store holds {}", op.dtype(), self.dtype),
            ));
        }
        let size = self.dtype.size_in_bytes();
        let (lines, line_len, rows_are_lines) = match self.layout {
            Layout::Row => (self.nrow, self.ncol, true),
            Layout::Col => (self.ncol, self.nrow, false),
        };
        let base = self.storage.as_mut_ptr() as usize;
        let run_line = |i: usize| {
            let bytes = unsafe {
                std::slice::from_raw_parts_mut((base as *mut u8).add(i * line_len * size), line_len * size)
            };
            if rows_are_lines {
                op.set(bytes, line_len, i, 0);
            } else {
                op.set(bytes, line_len, 0, i);
            }
        };
        if lines >= PAR_LINE_THRESHOLD {
            scheduler::pool().install(|| (0..lines).into_par_iter().for_each(run_line));
        } else {
            (0..lines).for_each(run_line);
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("mem({}x{})", self.nrow, self.ncol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init::ConstFill;
    use crate::dtype::Scalar;

    #[test]
    fn test_full_width_portion_is_zero_copy() {
        let store = MemStore::from_slice(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, Layout::Row)
            .unwrap();
        let p = store.get_portion(1, 0, 2, 2).unwrap();
        let (storage, offset) = p.raw_parts();
        assert_eq!(storage.as_ptr(), store.storage().as_ptr());
        assert_eq!(offset, 16);
        assert_eq!(p.get_f64(0, 0), 3.0);
    }

    #[test]
    fn test_partial_portion_copies() {
        let store = MemStore::from_slice(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row)
            .unwrap();
        let p = store.get_portion(0, 1, 2, 2).unwrap();
        assert_eq!(p.get_f64(0, 0), 2.0);
        assert_eq!(p.get_f64(1, 1), 6.0);
    }

    #[test]
    fn test_portion_out_of_bounds() {
        let store = MemStore::new(2, 2, Layout::Row, DType::F64).unwrap();
        assert!(store.get_portion(1, 0, 2, 2).is_err());
    }

    #[test]
    fn test_write_portion_roundtrip() {
        let store = MemStore::new(3, 3, Layout::Col, DType::I32).unwrap();
        let src = MemStore::from_slice(&[7i32, 8, 9, 10], 2, 2, Layout::Row).unwrap();
        let p = src.get_portion(0, 0, 2, 2).unwrap();
        store.write_portion(&p, 1, 1).unwrap();
        let back = store.get_portion(0, 0, 3, 3).unwrap();
        assert_eq!(back.get_f64(1, 1), 7.0);
        assert_eq!(back.get_f64(2, 2), 10.0);
        assert_eq!(back.get_f64(0, 0), 0.0);
    }

    #[test]
    fn test_transpose_shares_storage() {
        let store = MemStore::from_slice(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row)
            .unwrap();
        let ptr = store.storage().as_ptr();
        let t = store.transpose();
        assert_eq!(t.num_rows(), 3);
        assert_eq!(t.num_cols(), 2);
        assert_eq!(t.store_layout(), Layout::Col);
        let p = t.get_portion(0, 0, 3, 2).unwrap();
        let (storage, _) = p.raw_parts();
        assert_eq!(storage.as_ptr(), ptr);
        assert_eq!(p.get_f64(2, 1), 6.0);
    }

    #[test]
    fn test_set_data_const() {
        let store = MemStore::new(4, 3, Layout::Row, DType::F64).unwrap();
        store.set_data(&ConstFill::new(Scalar::new(7.5f64))).unwrap();
        let p = store.get_portion(0, 0, 4, 3).unwrap();
        assert!(p
            .as_bytes()
            .chunks(8)
            .all(|c| c == 7.5f64.to_le_bytes().as_slice()));
    }
}
