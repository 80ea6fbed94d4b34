//! Vectors: one-dimensional views over degenerate matrices
//!
//! A [`Vector`] owns (or shares) a contiguous run of elements. Sub-vectors
//! are views; `resize` grows by reallocating and rebinding. `groupby`
//! partitions a sorted copy at key boundaries found with the type's
//! `find_next` routine and runs the group operator per partition in
//! parallel.

use crate::dtype::{DType, Element, Scalar};
use crate::error::{Error, Result};
use crate::kernel::{dispatch_dtype, AggOperate, BinaryOp};
use crate::matrix::DenseMatrix;
use crate::scheduler;
use crate::store::{ConstFill, Layout, LocalStore, MatrixStore, MemStore, RandInit, SeqInit, Storage};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::warn;

/// A one-dimensional run of runtime-typed elements
#[derive(Clone)]
pub struct Vector {
    storage: Storage,
    /// Offset of element 0 within the storage, in elements
    offset: usize,
    len: usize,
    dtype: DType,
    sorted: bool,
}

/// Result of [`Vector::groupby`]
pub struct GroupBy {
    /// One entry per distinct key, present when `emit_keys` was set
    pub keys: Option<Vector>,
    /// Aggregated values, concatenated in key order
    pub aggs: Vector,
}

/// Operator applied to each group of equal keys
pub trait GroupApply: Send + Sync {
    /// Element type of the emitted values
    fn output_dtype(&self) -> DType;

    /// Consume one group, appending one or more elements to `out`
    fn run(&self, key: &[u8], group: &Vector, out: &mut Vec<u8>) -> Result<()>;
}

/// Group operator folding each group with a binary kernel
pub struct AggGroupApply {
    op: BinaryOp,
    dtype: DType,
}

impl AggGroupApply {
    /// Fold groups of `dtype` elements with `op`
    pub fn new(dtype: DType, op: BinaryOp) -> Self {
        Self { op, dtype }
    }
}

impl GroupApply for AggGroupApply {
    fn output_dtype(&self) -> DType {
        self.dtype
    }

    fn run(&self, _key: &[u8], group: &Vector, out: &mut Vec<u8>) -> Result<()> {
        let agg = AggOperate::new(self.dtype, self.op);
        let scalar = agg.run(group.bytes())?;
        out.extend_from_slice(scalar.as_bytes());
        Ok(())
    }
}

/// Group operator emitting each group's element count
pub struct CountGroupApply;

impl GroupApply for CountGroupApply {
    fn output_dtype(&self) -> DType {
        DType::I64
    }

    fn run(&self, _key: &[u8], group: &Vector, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&(group.len() as i64).to_ne_bytes());
        Ok(())
    }
}

impl Vector {
    /// A zeroed vector of `len` elements
    pub fn new(len: usize, dtype: DType) -> Result<Self> {
        Ok(Self {
            storage: Storage::zeroed(len * dtype.size_in_bytes())?,
            offset: 0,
            len,
            dtype,
            sorted: false,
        })
    }

    /// A vector holding a copy of a typed slice
    pub fn from_slice<T: Element>(data: &[T]) -> Result<Self> {
        Ok(Self {
            storage: Storage::from_slice(data)?,
            offset: 0,
            len: data.len(),
            dtype: T::DTYPE,
            sorted: false,
        })
    }

    /// A vector filled with one value
    pub fn constant(len: usize, value: Scalar) -> Result<Self> {
        let store = MemStore::new(len, 1, Layout::Col, value.dtype())?;
        store.set_data(&ConstFill::new(value))?;
        Ok(Self {
            storage: store.storage().clone(),
            offset: 0,
            len,
            dtype: value.dtype(),
            sorted: false,
        })
    }

    /// The sequence `from, from + by, ...` up to `to`
    ///
    /// The length is `floor((to - from) / by + 1e-9) + 1`; the epsilon
    /// absorbs floating rounding in the division and is part of the
    /// interface. A step pointing away from `to` fails with `BadSequence`.
    pub fn create_seq(from: f64, to: f64, by: f64) -> Result<Self> {
        if by == 0.0 {
            warn!("the sequence step must be nonzero");
            return Err(Error::BadSequence { from, to, by });
        }
        let n = (to - from) / by + 1e-9;
        if !(n >= 0.0) {
            warn!("wrong sign in the sequence step");
            return Err(Error::BadSequence { from, to, by });
        }
        let len = n as usize + 1;
        let store = MemStore::new(len, 1, Layout::Col, DType::F64)?;
        store.set_data(&SeqInit::new(DType::F64, from, by))?;
        Ok(Self {
            storage: store.storage().clone(),
            offset: 0,
            len,
            dtype: DType::F64,
            sorted: by >= 0.0,
        })
    }

    /// A uniformly random vector over `[min, max)`
    pub fn create_rand(len: usize, dtype: DType, min: f64, max: f64, seed: u64) -> Result<Self> {
        let store = MemStore::new(len, 1, Layout::Col, dtype)?;
        store.set_data(&RandInit::new(dtype, min, max, seed)?)?;
        Ok(Self {
            storage: store.storage().clone(),
            offset: 0,
            len,
            dtype,
            sorted: false,
        })
    }

    /// Wrap a degenerate (single row or column) portion
    pub(crate) fn from_local(p: &LocalStore) -> Result<Self> {
        if p.num_rows() != 1 && p.num_cols() != 1 {
            return Err(Error::internal("a vector portion must be one-dimensional"));
        }
        let (storage, offset_bytes) = p.raw_parts();
        Ok(Self {
            storage: storage.clone(),
            offset: offset_bytes / p.dtype().size_in_bytes(),
            len: p.num_rows().max(p.num_cols()),
            dtype: p.dtype(),
            sorted: false,
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no elements
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Whether the elements are known to be sorted
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        let size = self.dtype.size_in_bytes();
        unsafe { &self.storage.bytes()[self.offset * size..(self.offset + self.len) * size] }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let size = self.dtype.size_in_bytes();
        unsafe { &mut self.storage.bytes_mut()[self.offset * size..(self.offset + self.len) * size] }
    }

    /// Element `i`
    pub fn get(&self, i: usize) -> Result<Scalar> {
        if i >= self.len {
            return Err(Error::index_out_of_range(i, self.len));
        }
        let size = self.dtype.size_in_bytes();
        Ok(Scalar::from_bytes(
            self.dtype,
            &self.bytes()[i * size..(i + 1) * size],
        ))
    }

    /// Element `i` widened to f64
    pub fn get_f64(&self, i: usize) -> Result<f64> {
        Ok(self.get(i)?.to_f64())
    }

    /// Overwrite element `i`
    pub fn set(&mut self, i: usize, value: Scalar) -> Result<()> {
        if i >= self.len {
            return Err(Error::index_out_of_range(i, self.len));
        }
        if value.dtype() != self.dtype {
            return Err(Error::incompatible_operator(
                "set",
                "value dtype doesn't match the vector",
            ));
        }
        let size = self.dtype.size_in_bytes();
        self.bytes_mut()[i * size..(i + 1) * size].copy_from_slice(value.as_bytes());
        self.sorted = false;
        Ok(())
    }

    /// A view of `len` elements starting at `start`
    pub fn sub_vec(&self, start: usize, len: usize) -> Result<Vector> {
        if start + len > self.len {
            warn!("sub_vec: out of range");
            return Err(Error::index_out_of_range(start + len, self.len));
        }
        Ok(Self {
            storage: self.storage.clone(),
            offset: self.offset + start,
            len,
            dtype: self.dtype,
            sorted: self.sorted,
        })
    }

    /// Rebind this vector to a window of its backing storage
    ///
    /// `start` is absolute within the backing store, not relative to the
    /// current view.
    pub fn expose_sub_vec(&mut self, start: usize, len: usize) -> Result<()> {
        let capacity = self.storage.len() / self.dtype.size_in_bytes();
        if start + len > capacity {
            warn!("expose_sub_vec: out of range");
            return Err(Error::index_out_of_range(start + len, capacity));
        }
        self.offset = start;
        self.len = len;
        Ok(())
    }

    /// Change the length
    ///
    /// Shrinking (and growing within the backing allocation) rebinds in
    /// place; growing past it reallocates, copies the retained prefix, and
    /// rebinds. On allocation failure the vector is left untouched.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        if n == self.len {
            return Ok(());
        }
        let capacity = self.storage.len() / self.dtype.size_in_bytes();
        if self.offset + n <= capacity {
            self.len = n;
            return Ok(());
        }
        let size = self.dtype.size_in_bytes();
        let new_storage = Storage::zeroed(n * size)?;
        let keep = self.len.min(n) * size;
        unsafe {
            new_storage.bytes_mut()[..keep].copy_from_slice(&self.bytes()[..keep]);
        }
        self.storage = new_storage;
        self.offset = 0;
        self.len = n;
        Ok(())
    }

    /// Overwrite a window with another vector's elements
    pub fn set_sub_vec(&mut self, start: usize, other: &Vector) -> Result<()> {
        if other.dtype != self.dtype {
            warn!("the two vectors don't have the same type");
            return Err(Error::incompatible_operator(
                "set_sub_vec",
                "element types differ",
            ));
        }
        if start + other.len > self.len {
            warn!("set_sub_vec: out of range");
            return Err(Error::index_out_of_range(start + other.len, self.len));
        }
        let size = self.dtype.size_in_bytes();
        let src = other.bytes().to_vec();
        self.bytes_mut()[start * size..(start + other.len) * size].copy_from_slice(&src);
        self.sorted = false;
        Ok(())
    }

    /// Append another vector
    pub fn append(&mut self, other: &Vector) -> Result<()> {
        let at = self.len;
        self.resize(at + other.len)?;
        self.set_sub_vec(at, other)
    }

    /// Append a run of vectors, resizing once
    pub fn append_all<'a>(&mut self, others: impl IntoIterator<Item = &'a Vector>) -> Result<()> {
        let others: Vec<&Vector> = others.into_iter().collect();
        let total: usize = self.len + others.iter().map(|v| v.len).sum::<usize>();
        let mut at = self.len;
        self.resize(total)?;
        for v in others {
            self.set_sub_vec(at, v)?;
            at += v.len;
        }
        Ok(())
    }

    /// An owned copy of this vector
    pub fn deep_copy(&self) -> Result<Vector> {
        Ok(Self {
            storage: Storage::from_bytes(self.bytes())?,
            offset: 0,
            len: self.len,
            dtype: self.dtype,
            sorted: self.sorted,
        })
    }

    /// Element-wise equality
    pub fn equals(&self, other: &Vector) -> bool {
        self.len == other.len && self.dtype == other.dtype && self.bytes() == other.bytes()
    }

    /// Sort in place, ascending
    pub fn sort(&mut self) {
        dispatch_dtype!(self.dtype, T => {
            let data: &mut [T] = bytemuck::cast_slice_mut(self.bytes_mut());
            data.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        });
        self.sorted = true;
    }

    /// Sort in place and report where each element landed
    ///
    /// Returns an i64 vector `idx` with `sorted[idx[i]] == original[i]`.
    pub fn sort_with_index(&mut self) -> Result<Vector> {
        let n = self.len;
        let mut perm: Vec<usize> = (0..n).collect();
        dispatch_dtype!(self.dtype, T => {
            let data: &[T] = bytemuck::cast_slice(self.bytes());
            perm.sort_by(|&i, &j| data[i].partial_cmp(&data[j]).unwrap_or(std::cmp::Ordering::Equal));
            let sorted: Vec<T> = perm.iter().map(|&i| data[i]).collect();
            self.bytes_mut().copy_from_slice(bytemuck::cast_slice(&sorted));
        });
        self.sorted = true;
        let mut positions = vec![0i64; n];
        for (j, &i) in perm.iter().enumerate() {
            positions[i] = j as i64;
        }
        Vector::from_slice(&positions)
    }

    /// Gather elements by an i64 index vector
    pub fn gather(&self, idxs: &Vector) -> Result<Vector> {
        if idxs.dtype != DType::I64 {
            warn!("the index vector isn't of the i64 type");
            return Err(Error::incompatible_operator(
                "gather",
                "indices must be i64",
            ));
        }
        let size = self.dtype.size_in_bytes();
        let mut out = Vector::new(idxs.len, self.dtype)?;
        for i in 0..idxs.len {
            let idx = idxs
                .get(i)?
                .get::<i64>()
                .expect("index vector dtype was checked");
            if idx < 0 || idx as usize >= self.len {
                return Err(Error::index_out_of_range(idx.max(0) as usize, self.len));
            }
            let src = idx as usize;
            let dst_bytes = out.bytes_mut();
            let src_bytes = &self.bytes()[src * size..(src + 1) * size];
            dst_bytes[i * size..(i + 1) * size].copy_from_slice(src_bytes);
        }
        Ok(out)
    }

    /// Group equal keys and apply `op` to each group
    ///
    /// The vector is sorted first (on a copy when needed); boundaries
    /// between groups come from the type's `find_next` routine. Partitions
    /// run in parallel and never split a group.
    pub fn groupby(&self, op: &dyn GroupApply, emit_keys: bool) -> Result<GroupBy> {
        let sorted_vec = if self.sorted {
            self.clone()
        } else {
            let mut c = self.deep_copy()?;
            c.sort();
            c
        };
        let n = sorted_vec.len;
        let find_next = AggOperate::new(self.dtype, BinaryOp::Add);

        // Partition starts snapped forward to the next key boundary.
        let workers = crate::config::config().num_workers.max(1);
        let mut starts = Vec::with_capacity(workers + 1);
        starts.push(0usize);
        for w in 1..workers {
            let raw = n / workers * w;
            let boundary = raw + find_next.find_next(&sorted_vec.bytes()[raw * self.dtype.size_in_bytes()..]);
            starts.push(boundary.min(n));
        }
        starts.push(n);
        starts.sort_unstable();
        starts.dedup();

        let ranges: Vec<(usize, usize)> = starts.windows(2).map(|w| (w[0], w[1])).collect();
        let run_range = |&(start, end): &(usize, usize)| -> Result<(Vec<u8>, Vec<u8>)> {
            sorted_vec.serial_groupby(op, start, end, &find_next)
        };
        let parts: Vec<(Vec<u8>, Vec<u8>)> = if ranges.len() > 1 {
            scheduler::pool().install(|| ranges.par_iter().map(run_range).collect::<Result<_>>())?
        } else {
            ranges.iter().map(run_range).collect::<Result<_>>()?
        };

        let mut key_bytes = Vec::new();
        let mut agg_bytes = Vec::new();
        for (k, a) in parts {
            key_bytes.extend_from_slice(&k);
            agg_bytes.extend_from_slice(&a);
        }
        let keys = if emit_keys {
            Some(Vector {
                storage: Storage::from_bytes(&key_bytes)?,
                offset: 0,
                len: key_bytes.len() / self.dtype.size_in_bytes(),
                dtype: self.dtype,
                sorted: true,
            })
        } else {
            None
        };
        let out_size = op.output_dtype().size_in_bytes();
        let aggs = Vector {
            storage: Storage::from_bytes(&agg_bytes)?,
            offset: 0,
            len: agg_bytes.len() / out_size,
            dtype: op.output_dtype(),
            sorted: false,
        };
        Ok(GroupBy { keys, aggs })
    }

    /// Run groups within `[start, end)`; the range must begin on a boundary
    fn serial_groupby(
        &self,
        op: &dyn GroupApply,
        start: usize,
        end: usize,
        find_next: &AggOperate,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let size = self.dtype.size_in_bytes();
        let mut keys = Vec::new();
        let mut aggs = Vec::new();
        let mut loc = start;
        while loc < end {
            let run = find_next.find_next(&self.bytes()[loc * size..end * size]);
            let group = self.sub_vec(loc, run)?;
            let key = &self.bytes()[loc * size..(loc + 1) * size];
            keys.extend_from_slice(key);
            op.run(key, &group, &mut aggs)?;
            loc += run;
        }
        Ok((keys, aggs))
    }

    /// All elements widened to f64
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len)
            .map(|i| self.get(i).expect("index in range").to_f64())
            .collect()
    }

    /// View this vector as an `len x 1` column matrix
    pub fn to_matrix(&self, nrow: usize, ncol: usize, layout: Layout) -> Result<DenseMatrix> {
        if nrow * ncol != self.len {
            return Err(Error::shape_mismatch((self.len, 1), (nrow, ncol)));
        }
        let store = if self.offset == 0 {
            MemStore::from_raw(self.storage.clone(), nrow, ncol, layout, self.dtype)?
        } else {
            MemStore::from_raw(Storage::from_bytes(self.bytes())?, nrow, ncol, layout, self.dtype)?
        };
        Ok(DenseMatrix::from_store(store))
    }

    /// The vector as a `1 x len` row store
    pub(crate) fn to_row_store(&self) -> Result<Arc<dyn MatrixStore>> {
        let store = if self.offset == 0 {
            MemStore::from_raw(self.storage.clone(), 1, self.len, Layout::Row, self.dtype)?
        } else {
            MemStore::from_raw(
                Storage::from_bytes(self.bytes())?,
                1,
                self.len,
                Layout::Row,
                self.dtype,
            )?
        };
        Ok(store)
    }

    /// The vector as a `len x 1` column store
    pub(crate) fn to_col_store(&self) -> Result<Arc<dyn MatrixStore>> {
        let store = if self.offset == 0 {
            MemStore::from_raw(self.storage.clone(), self.len, 1, Layout::Col, self.dtype)?
        } else {
            MemStore::from_raw(
                Storage::from_bytes(self.bytes())?,
                self.len,
                1,
                Layout::Col,
                self.dtype,
            )?
        };
        Ok(store)
    }
}

impl std::fmt::Debug for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vector")
            .field("len", &self.len)
            .field("dtype", &self.dtype)
            .field("sorted", &self.sorted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_vec_views_share() {
        let v = Vector::from_slice(&[1.0f64, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let s = v.sub_vec(1, 3).unwrap();
        assert_eq!(s.len(), 3);
        for i in 0..3 {
            assert_eq!(s.get_f64(i).unwrap(), v.get_f64(1 + i).unwrap());
        }
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let mut v = Vector::from_slice(&[1i32, 2, 3]).unwrap();
        v.resize(5).unwrap();
        assert_eq!(v.len(), 5);
        assert_eq!(v.get_f64(2).unwrap(), 3.0);
        assert_eq!(v.get_f64(4).unwrap(), 0.0);
        v.resize(2).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.get_f64(1).unwrap(), 2.0);
    }

    #[test]
    fn test_append() {
        let mut v = Vector::from_slice(&[1.0f64, 2.0]).unwrap();
        let w = Vector::from_slice(&[3.0f64, 4.0]).unwrap();
        v.append(&w).unwrap();
        assert_eq!(v.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_append_dtype_mismatch() {
        let mut v = Vector::from_slice(&[1.0f64]).unwrap();
        let w = Vector::from_slice(&[1i32]).unwrap();
        assert!(v.append(&w).is_err());
    }

    #[test]
    fn test_sort_with_index_positions() {
        let mut v = Vector::from_slice(&[3.0f64, 1.0, 2.0]).unwrap();
        let original = v.to_f64_vec();
        let idx = v.sort_with_index().unwrap();
        assert_eq!(v.to_f64_vec(), vec![1.0, 2.0, 3.0]);
        for i in 0..3 {
            let j = idx.get(i).unwrap().get::<i64>().unwrap() as usize;
            assert_eq!(v.get_f64(j).unwrap(), original[i]);
        }
    }

    #[test]
    fn test_gather() {
        let v = Vector::from_slice(&[10.0f64, 20.0, 30.0]).unwrap();
        let idx = Vector::from_slice(&[2i64, 0, 0]).unwrap();
        let g = v.gather(&idx).unwrap();
        assert_eq!(g.to_f64_vec(), vec![30.0, 10.0, 10.0]);
        let bad = Vector::from_slice(&[5i64]).unwrap();
        assert!(v.gather(&bad).is_err());
    }

    #[test]
    fn test_expose_sub_vec_absolute() {
        let mut v = Vector::from_slice(&[1.0f64, 2.0, 3.0, 4.0]).unwrap();
        v.expose_sub_vec(2, 2).unwrap();
        assert_eq!(v.to_f64_vec(), vec![3.0, 4.0]);
        v.expose_sub_vec(0, 4).unwrap();
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn test_seq_bad_sign() {
        assert!(Vector::create_seq(5.0, 1.0, 1.0).is_err());
        assert!(Vector::create_seq(1.0, 5.0, -1.0).is_err());
    }
}
