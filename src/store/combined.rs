//! Combined store: a block group presented as one matrix
//!
//! Members share dtype and layout and one dimension; the other dimension
//! sums. A tall group concatenates members along columns (each member spans
//! every row); a wide group concatenates along rows. Portions that stay
//! inside one member are zero-copy forwards; portions crossing a block
//! boundary are assembled by copy under a short lock.

use super::local::LocalStore;
use super::{check_portion_bounds, Layout, MatrixStore, OffsetSetOperate, SetOperate};
use crate::dtype::DType;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// An ordered group of stores forming one logical matrix
pub struct CombinedStore {
    mats: Vec<Arc<dyn MatrixStore>>,
    layout: Layout,
    nrow: usize,
    ncol: usize,
    /// Members stack along rows (wide group) when true, columns otherwise
    rows_concat: bool,
    /// Start offset of each member along the concat axis
    offsets: Vec<usize>,
    assembly_lock: Mutex<()>,
}

impl CombinedStore {
    /// Group `mats` into one store
    ///
    /// All members must share dtype and `layout`; they must agree on one
    /// dimension, and the other dimension sums. Fails with `ShapeMismatch`
    /// when neither dimension is shared.
    pub fn new(mats: Vec<Arc<dyn MatrixStore>>, layout: Layout) -> Result<Arc<Self>> {
        if mats.is_empty() {
            return Err(Error::internal("combined store needs at least one member"));
        }
        let dtype = mats[0].dtype();
        for m in &mats {
            if m.dtype() != dtype {
                return Err(Error::incompatible_operator(
                    "combined",
                    "members must share an element type",
                ));
            }
            if m.store_layout() != layout {
                return Err(Error::incompatible_operator(
                    "combined",
                    "members must share a layout",
                ));
            }
        }

        let rows_shared = mats.iter().all(|m| m.num_rows() == mats[0].num_rows());
        let cols_shared = mats.iter().all(|m| m.num_cols() == mats[0].num_cols());
        let rows_concat = if rows_shared && cols_shared {
            // A single member (or equal squares): orient by the member shape.
            mats[0].num_rows() < mats[0].num_cols()
        } else if rows_shared {
            false
        } else if cols_shared {
            true
        } else {
            return Err(Error::shape_mismatch(
                (mats[0].num_rows(), mats[0].num_cols()),
                (mats[1].num_rows(), mats[1].num_cols()),
            ));
        };

        let mut offsets = Vec::with_capacity(mats.len());
        let mut at = 0;
        for m in &mats {
            offsets.push(at);
            at += if rows_concat {
                m.num_rows()
            } else {
                m.num_cols()
            };
        }
        let (nrow, ncol) = if rows_concat {
            (at, mats[0].num_cols())
        } else {
            (mats[0].num_rows(), at)
        };
        Ok(Arc::new(Self {
            mats,
            layout,
            nrow,
            ncol,
            rows_concat,
            offsets,
            assembly_lock: Mutex::new(()),
        }))
    }

    /// Number of members
    pub fn num_mats(&self) -> usize {
        self.mats.len()
    }

    /// Member `i`
    pub fn get_mat(&self, i: usize) -> Arc<dyn MatrixStore> {
        Arc::clone(&self.mats[i])
    }

    /// All members in order
    pub fn members(&self) -> &[Arc<dyn MatrixStore>] {
        &self.mats
    }

    /// Whether members stack along rows (wide group)
    pub fn rows_concat(&self) -> bool {
        self.rows_concat
    }

    /// Concat-axis start of member `i`
    pub fn member_offset(&self, i: usize) -> usize {
        self.offsets[i]
    }

    /// Concat-axis size of member `i`
    fn member_len(&self, i: usize) -> usize {
        if self.rows_concat {
            self.mats[i].num_rows()
        } else {
            self.mats[i].num_cols()
        }
    }

    fn member_at(&self, axis: usize) -> usize {
        // offsets is sorted; find the member whose range holds `axis`.
        match self.offsets.binary_search(&axis) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    /// Rebuild the group with new members of the same shapes
    pub fn with_members(&self, mats: Vec<Arc<dyn MatrixStore>>) -> Result<Arc<Self>> {
        Self::new(mats, self.layout)
    }

    /// Typed transpose, for callers that need the group back
    pub fn transpose_group(&self) -> Arc<CombinedStore> {
        let mats: Vec<Arc<dyn MatrixStore>> = self
            .mats
            .iter()
            .map(|m| Arc::clone(m).transpose())
            .collect();
        Arc::new(CombinedStore {
            mats,
            layout: self.layout.flip(),
            nrow: self.ncol,
            ncol: self.nrow,
            rows_concat: !self.rows_concat,
            offsets: self.offsets.clone(),
            assembly_lock: Mutex::new(()),
        })
    }
}

impl MatrixStore for CombinedStore {
    fn num_rows(&self) -> usize {
        self.nrow
    }

    fn num_cols(&self) -> usize {
        self.ncol
    }

    fn dtype(&self) -> DType {
        self.mats[0].dtype()
    }

    fn store_layout(&self) -> Layout {
        self.layout
    }

    fn is_in_mem(&self) -> bool {
        self.mats.iter().all(|m| m.is_in_mem())
    }

    fn is_virtual(&self) -> bool {
        self.mats.iter().any(|m| m.is_virtual())
    }

    fn get_portion(
        &self,
        start_row: usize,
        start_col: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<LocalStore> {
        check_portion_bounds(self.nrow, self.ncol, start_row, start_col, num_rows, num_cols)?;
        let (a0, alen) = if self.rows_concat {
            (start_row, num_rows)
        } else {
            (start_col, num_cols)
        };
        let first = self.member_at(a0);
        let last = self.member_at(a0 + alen - 1);

        if first == last {
            let local = a0 - self.offsets[first];
            let p = if self.rows_concat {
                self.mats[first].get_portion(local, start_col, num_rows, num_cols)?
            } else {
                self.mats[first].get_portion(start_row, local, num_rows, num_cols)?
            };
            return Ok(p.with_start(start_row, start_col));
        }

        let _guard = self.assembly_lock.lock();
        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.dtype(),
        )?;
        let mut covered = 0;
        for idx in first..=last {
            let local = (a0 + covered) - self.offsets[idx];
            let take = (self.member_len(idx) - local).min(alen - covered);
            let sub = if self.rows_concat {
                self.mats[idx].get_portion(local, start_col, take, num_cols)?
            } else {
                self.mats[idx].get_portion(start_row, local, num_rows, take)?
            };
            if self.rows_concat {
                out.copy_region_from(&sub, covered, 0)?;
            } else {
                out.copy_region_from(&sub, 0, covered)?;
            }
            covered += take;
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
        let (a0, alen) = if self.rows_concat {
            (dest_row, portion.num_rows())
        } else {
            (dest_col, portion.num_cols())
        };
        let first = self.member_at(a0);
        let last = self.member_at(a0 + alen - 1);
        let mut covered = 0;
        for idx in first..=last {
            let local = (a0 + covered) - self.offsets[idx];
            let take = (self.member_len(idx) - local).min(alen - covered);
            if self.rows_concat {
                let sub = portion.sub_portion(covered, 0, take, portion.num_cols())?;
                self.mats[idx].write_portion(&sub, local, dest_col)?;
            } else {
                let sub = portion.sub_portion(0, covered, portion.num_rows(), take)?;
                self.mats[idx].write_portion(&sub, dest_row, local)?;
            }
            covered += take;
        }
        Ok(())
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        self.transpose_group()
    }

    fn set_data(&self, op: &dyn SetOperate) -> Result<()> {
        for (i, m) in self.mats.iter().enumerate() {
            let shifted = if self.rows_concat {
                OffsetSetOperate {
                    inner: op,
                    row_off: self.offsets[i],
                    col_off: 0,
                }
            } else {
                OffsetSetOperate {
                    inner: op,
                    row_off: 0,
                    col_off: self.offsets[i],
                }
            };
            m.set_data(&shifted)?;
        }
        Ok(())
    }

    fn set_cache_portion(&self, cache: bool) {
        for m in &self.mats {
            m.set_cache_portion(cache);
        }
    }

    fn as_combined(&self) -> Option<&CombinedStore> {
        Some(self)
    }

    fn name(&self) -> String {
        format!(
            "combined({} mats, {}x{})",
            self.mats.len(),
            self.nrow,
            self.ncol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    fn tall_group() -> Arc<CombinedStore> {
        // 4x2 and 4x1 members, tall group of shape 4x3.
        let a = MemStore::from_slice(
            &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            4,
            2,
            Layout::Col,
        )
        .unwrap();
        let b = MemStore::from_slice(&[9.0f64, 10.0, 11.0, 12.0], 4, 1, Layout::Col).unwrap();
        CombinedStore::new(vec![a as _, b as _], Layout::Col).unwrap()
    }

    #[test]
    fn test_group_shape() {
        let g = tall_group();
        assert_eq!(g.num_rows(), 4);
        assert_eq!(g.num_cols(), 3);
        assert!(!g.rows_concat());
        assert_eq!(g.num_mats(), 2);
    }

    #[test]
    fn test_single_member_portion_zero_copy() {
        let g = tall_group();
        let p = g.get_portion(0, 0, 4, 2).unwrap();
        let member = g.get_mat(0);
        let member_p = member.get_portion(0, 0, 4, 2).unwrap();
        assert_eq!(
            p.raw_parts().0.as_ptr(),
            member_p.raw_parts().0.as_ptr()
        );
    }

    #[test]
    fn test_boundary_crossing_portion() {
        let g = tall_group();
        let p = g.get_portion(1, 1, 2, 2).unwrap();
        // Column 1 holds 5..8, column 2 holds 9..12 (column-major members).
        assert_eq!(p.get_f64(0, 0), 6.0);
        assert_eq!(p.get_f64(0, 1), 10.0);
        assert_eq!(p.get_f64(1, 1), 11.0);
    }

    #[test]
    fn test_transpose_flips_orientation() {
        let g = tall_group();
        let t = Arc::clone(&g).transpose() ;
        assert_eq!(t.num_rows(), 3);
        assert_eq!(t.num_cols(), 4);
        let p = t.get_portion(2, 0, 1, 4).unwrap();
        assert_eq!(p.get_f64(0, 0), 9.0);
        assert_eq!(p.get_f64(0, 3), 12.0);
    }

    #[test]
    fn test_mixed_dtype_rejected() {
        let a = MemStore::new(2, 2, Layout::Row, DType::F64).unwrap();
        let b = MemStore::new(2, 2, Layout::Row, DType::I32).unwrap();
        assert!(CombinedStore::new(vec![a as _, b as _], Layout::Row).is_err());
    }

    #[test]
    fn test_write_across_members() {
        let a = MemStore::new(4, 2, Layout::Col, DType::F64).unwrap();
        let b = MemStore::new(4, 2, Layout::Col, DType::F64).unwrap();
        let g = CombinedStore::new(vec![a as _, b as _], Layout::Col).unwrap();
        let src =
            MemStore::from_slice(&[1.0f64, 2.0, 3.0, 4.0], 1, 4, Layout::Row).unwrap();
        let p = src.get_portion(0, 0, 1, 4).unwrap();
        g.write_portion(&p, 2, 0).unwrap();
        let back = g.get_portion(2, 0, 1, 4).unwrap();
        for j in 0..4 {
            assert_eq!(back.get_f64(0, j), (j + 1) as f64);
        }
    }
}
