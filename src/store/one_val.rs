//! Constant matrix store

use super::local::LocalStore;
use super::{check_portion_bounds, Layout, MatrixStore};
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use std::sync::Arc;

/// A matrix of any shape represented by a single scalar
pub struct OneValStore {
    value: Scalar,
    nrow: usize,
    ncol: usize,
    layout: Layout,
}

impl OneValStore {
    /// Constant store of shape `(nrow, ncol)`
    pub fn new(value: Scalar, nrow: usize, ncol: usize, layout: Layout) -> Arc<Self> {
        Arc::new(Self {
            value,
            nrow,
            ncol,
            layout,
        })
    }

    /// The constant value
    pub fn value(&self) -> Scalar {
        self.value
    }
}

impl MatrixStore for OneValStore {
    fn num_rows(&self) -> usize {
        self.nrow
    }

    fn num_cols(&self) -> usize {
        self.ncol
    }

    fn dtype(&self) -> DType {
        self.value.dtype()
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
        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.value.dtype(),
        )?;
        out.fill_scalar(self.value);
        Ok(out)
    }

    fn write_portion(&self, _portion: &LocalStore, _dest_row: usize, _dest_col: usize) -> Result<()> {
        Err(Error::internal("constant store is read-only"))
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        Arc::new(OneValStore {
            value: self.value,
            nrow: self.ncol,
            ncol: self.nrow,
            layout: self.layout.flip(),
        })
    }

    fn name(&self) -> String {
        format!("const({})", self.value.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portion_synthesized() {
        let store = OneValStore::new(Scalar::new(4i64), 5, 3, Layout::Col);
        let p = store.get_portion(2, 1, 3, 2).unwrap();
        assert_eq!(p.num_rows(), 3);
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(p.get_f64(i, j), 4.0);
            }
        }
    }

    #[test]
    fn test_read_only() {
        let store = OneValStore::new(Scalar::new(1.0f64), 2, 2, Layout::Row);
        let p = store.get_portion(0, 0, 1, 1).unwrap();
        assert!(store.write_portion(&p, 0, 0).is_err());
    }
}
