//! External-memory matrix store
//!
//! `EmStore` keeps its elements on a [`ByteStore`], the pluggable byte-range
//! I/O collaborator, and serves portions by synchronous reads. Portions are
//! retained in a page cache while the cache hint is on; turning the hint off
//! makes reads one-shot, which the block inner product uses to stream
//! intermediates without evicting useful data.

use super::local::LocalStore;
use super::{check_portion_bounds, Layout, MatrixStore, SetOperate};
use crate::config;
use crate::dtype::DType;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Byte-range I/O collaborator backing an external store
pub trait ByteStore: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    /// Whether the store holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `buf.len()` bytes at `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
}

/// In-process byte store, the default backing for tests and small data
pub struct MemByteStore {
    data: Mutex<Vec<u8>>,
}

impl MemByteStore {
    /// A zeroed byte store of `len` bytes
    pub fn with_len(len: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; len]),
        })
    }

    /// A byte store holding a copy of `data`
    pub fn from_bytes(data: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data.to_vec()),
        })
    }
}

impl ByteStore for MemByteStore {
    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .filter(|&e| e <= data.len())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "read past end of byte store",
                ))
            })?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut store = self.data.lock();
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&e| e <= store.len())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "write past end of byte store",
                ))
            })?;
        store[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// File-backed byte store using positioned reads and writes
pub struct FileByteStore {
    file: std::fs::File,
}

impl FileByteStore {
    /// Open (or create) a file-backed byte store of at least `len` bytes
    pub fn open(path: &std::path::Path, len: u64) -> Result<Arc<Self>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }
        Ok(Arc::new(Self { file }))
    }

    /// Whether a byte store exists at `path`
    pub fn exists(path: &std::path::Path) -> bool {
        path.exists()
    }
}

#[cfg(unix)]
impl ByteStore for FileByteStore {
    fn len(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(data, offset)?;
        Ok(())
    }
}

type PortionKey = (usize, usize, usize, usize);

/// A matrix resident on external storage
pub struct EmStore {
    bytes: Arc<dyn ByteStore>,
    nrow: usize,
    ncol: usize,
    layout: Layout,
    dtype: DType,
    cache_portions: AtomicBool,
    cache: Mutex<HashMap<PortionKey, LocalStore>>,
}

impl EmStore {
    /// Wrap a byte store as an external matrix
    ///
    /// The byte store must be large enough to hold the full matrix.
    pub fn new(
        bytes: Arc<dyn ByteStore>,
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
    ) -> Result<Arc<Self>> {
        let needed = (nrow * ncol * dtype.size_in_bytes()) as u64;
        if bytes.len() < needed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("byte store holds {} bytes, matrix needs {}", bytes.len(), needed),
            )));
        }
        Ok(Arc::new(Self {
            bytes,
            nrow,
            ncol,
            layout,
            dtype,
            cache_portions: AtomicBool::new(true),
            cache: Mutex::new(HashMap::new()),
        }))
    }

    fn elem_offset(&self, i: usize, j: usize) -> u64 {
        let idx = match self.layout {
            Layout::Row => i * self.ncol + j,
            Layout::Col => j * self.nrow + i,
        };
        (idx * self.dtype.size_in_bytes()) as u64
    }

    fn read_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        let size = self.dtype.size_in_bytes();
        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.dtype,
        )?;
        let bytes = out.as_bytes_mut();
        match self.layout {
            Layout::Row => {
                if num_cols == self.ncol {
                    self.bytes
                        .read_at(self.elem_offset(start_row, 0), bytes)?;
                } else {
                    let line = num_cols * size;
                    for i in 0..num_rows {
                        self.bytes.read_at(
                            self.elem_offset(start_row + i, start_col),
                            &mut bytes[i * line..(i + 1) * line],
                        )?;
                    }
                }
            }
            Layout::Col => {
                if num_rows == self.nrow {
                    self.bytes
                        .read_at(self.elem_offset(0, start_col), bytes)?;
                } else {
                    let line = num_rows * size;
                    for j in 0..num_cols {
                        self.bytes.read_at(
                            self.elem_offset(start_row, start_col + j),
                            &mut bytes[j * line..(j + 1) * line],
                        )?;
                    }
                }
            }
        }
        Ok(out)
    }
}

impl MatrixStore for EmStore {
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
        false
    }

    fn get_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        check_portion_bounds(self.nrow, self.ncol, start_row, start_col, num_rows, num_cols)?;
        let key = (start_row, start_col, num_rows, num_cols);
        let caching = self.cache_portions.load(Ordering::Relaxed);
        if caching {
            if let Some(p) = self.cache.lock().get(&key) {
                return Ok(p.clone());
            }
        }
        let portion = self.read_portion(start_row, start_col, num_rows, num_cols)?;
        if caching {
            self.cache.lock().insert(key, portion.clone());
        }
        Ok(portion)
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
        let aligned = if portion.layout() == self.layout {
            portion.clone()
        } else {
            portion.to_layout(self.layout)?
        };
        let size = self.dtype.size_in_bytes();
        let bytes = aligned.as_bytes();
        match self.layout {
            Layout::Row => {
                let line = aligned.num_cols() * size;
                for i in 0..aligned.num_rows() {
                    self.bytes.write_at(
                        self.elem_offset(dest_row + i, dest_col),
                        &bytes[i * line..(i + 1) * line],
                    )?;
                }
            }
            Layout::Col => {
                let line = aligned.num_rows() * size;
                for j in 0..aligned.num_cols() {
                    self.bytes.write_at(
                        self.elem_offset(dest_row, dest_col + j),
                        &bytes[j * line..(j + 1) * line],
                    )?;
                }
            }
        }
        // Stale cached portions must not shadow the write.
        self.cache.lock().clear();
        Ok(())
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        Arc::new(EmStore {
            bytes: self.bytes.clone(),
            nrow: self.ncol,
            ncol: self.nrow,
            layout: self.layout.flip(),
            dtype: self.dtype,
            cache_portions: AtomicBool::new(self.cache_portions.load(Ordering::Relaxed)),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn set_data(&self, op: &dyn SetOperate) -> Result<()> {
        if op.dtype() != self.dtype {
            return Err(Error::incompatible_operator(
                "set_data",
                format!("initializer writes {}, store holds {}", op.dtype(), self.dtype),
            ));
        }
        let cfg = config::config();
        let size = self.dtype.size_in_bytes();
        // Tile along the long axis, initialize in memory, flush each tile.
        if self.nrow >= self.ncol {
            let step = cfg.portion_rows.min(self.nrow);
            let mut r = 0;
            while r < self.nrow {
                let nr = step.min(self.nrow - r);
                let mut tile = LocalStore::new_owned(r, 0, nr, self.ncol, self.layout, self.dtype)?;
                init_tile(&mut tile, op, size);
                self.write_portion(&tile, r, 0)?;
                r += nr;
            }
        } else {
            let step = cfg.portion_cols.min(self.ncol);
            let mut c = 0;
            while c < self.ncol {
                let nc = step.min(self.ncol - c);
                let mut tile = LocalStore::new_owned(0, c, self.nrow, nc, self.layout, self.dtype)?;
                init_tile(&mut tile, op, size);
                self.write_portion(&tile, 0, c)?;
                c += nc;
            }
        }
        Ok(())
    }

    fn set_cache_portion(&self, cache: bool) {
        self.cache_portions.store(cache, Ordering::Relaxed);
        if !cache {
            self.cache.lock().clear();
        }
    }

    fn name(&self) -> String {
        format!("em({}x{})", self.nrow, self.ncol)
    }
}

/// Run an initializer over every line of an in-memory tile
fn init_tile(tile: &mut LocalStore, op: &dyn SetOperate, size: usize) {
    let (start_row, start_col) = (tile.start_row(), tile.start_col());
    let (nrow, ncol, layout) = (tile.num_rows(), tile.num_cols(), tile.layout());
    let bytes = tile.as_bytes_mut();
    match layout {
        Layout::Row => {
            let line = ncol * size;
            for i in 0..nrow {
                op.set(
                    &mut bytes[i * line..(i + 1) * line],
                    ncol,
                    start_row + i,
                    start_col,
                );
            }
        }
        Layout::Col => {
            let line = nrow * size;
            for j in 0..ncol {
                op.set(
                    &mut bytes[j * line..(j + 1) * line],
                    nrow,
                    start_row,
                    start_col + j,
                );
            }
        }
    }
}
