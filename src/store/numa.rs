//! NUMA-striped matrix store
//!
//! The long dimension is split into equal stripes, one per NUMA node; each
//! stripe is a contiguous in-memory chunk. Portion extraction inside one
//! stripe forwards to the stripe directly; cross-stripe requests are
//! assembled by copy.

use super::local::LocalStore;
use super::mem::MemStore;
use super::{check_portion_bounds, is_wide_shape, Layout, MatrixStore, OffsetSetOperate, SetOperate};
use crate::dtype::DType;
use crate::error::Result;
use std::sync::Arc;

/// NUMA topology collaborator: how many nodes to stripe across
#[derive(Copy, Clone, Debug)]
pub struct NumaTopology {
    nodes: usize,
}

impl NumaTopology {
    /// Topology with `nodes` NUMA nodes (at least one)
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes: nodes.max(1),
        }
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.nodes
    }
}

impl Default for NumaTopology {
    fn default() -> Self {
        Self { nodes: 1 }
    }
}

/// A matrix striped across NUMA nodes along its long dimension
pub struct NumaStore {
    stripes: Vec<Arc<MemStore>>,
    /// Rows (or columns) per full stripe
    stripe_len: usize,
    /// Stripes split rows when true, columns otherwise
    rows_striped: bool,
    nrow: usize,
    ncol: usize,
    layout: Layout,
    dtype: DType,
}

impl NumaStore {
    /// Allocate a zeroed striped matrix
    pub fn new(
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
        topology: NumaTopology,
    ) -> Result<Arc<Self>> {
        let rows_striped = !is_wide_shape(nrow, ncol);
        let long = if rows_striped { nrow } else { ncol };
        let stripe_len = long.div_ceil(topology.num_nodes());
        let mut stripes = Vec::new();
        let mut at = 0;
        while at < long {
            let len = stripe_len.min(long - at);
            let stripe = if rows_striped {
                MemStore::new(len, ncol, layout, dtype)?
            } else {
                MemStore::new(nrow, len, layout, dtype)?
            };
            stripes.push(stripe);
            at += len;
        }
        Ok(Arc::new(Self {
            stripes,
            stripe_len,
            rows_striped,
            nrow,
            ncol,
            layout,
            dtype,
        }))
    }

    fn from_parts(
        stripes: Vec<Arc<MemStore>>,
        stripe_len: usize,
        rows_striped: bool,
        nrow: usize,
        ncol: usize,
        layout: Layout,
        dtype: DType,
    ) -> Arc<Self> {
        Arc::new(Self {
            stripes,
            stripe_len,
            rows_striped,
            nrow,
            ncol,
            layout,
            dtype,
        })
    }

    /// Number of stripes
    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    /// Striped-axis coordinates of a portion rectangle
    fn axis_range(&self, start_row: usize, start_col: usize, nrow: usize, ncol: usize) -> (usize, usize) {
        if self.rows_striped {
            (start_row, nrow)
        } else {
            (start_col, ncol)
        }
    }
}

impl MatrixStore for NumaStore {
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
        let (a0, alen) = self.axis_range(start_row, start_col, num_rows, num_cols);
        let first = a0 / self.stripe_len;
        let last = (a0 + alen - 1) / self.stripe_len;

        if first == last {
            let local = a0 - first * self.stripe_len;
            let p = if self.rows_striped {
                self.stripes[first].get_portion(local, start_col, num_rows, num_cols)?
            } else {
                self.stripes[first].get_portion(start_row, local, num_rows, num_cols)?
            };
            return Ok(p.with_start(start_row, start_col));
        }

        // Assemble a cross-stripe portion by copy.
        let mut out = LocalStore::new_owned(
            start_row,
            start_col,
            num_rows,
            num_cols,
            self.layout,
            self.dtype,
        )?;
        let mut covered = 0;
        for idx in first..=last {
            let stripe = &self.stripes[idx];
            let stripe_start = idx * self.stripe_len;
            let local = (a0 + covered) - stripe_start;
            let stripe_axis_len = if self.rows_striped {
                stripe.num_rows()
            } else {
                stripe.num_cols()
            };
            let take = (stripe_axis_len - local).min(alen - covered);
            let sub = if self.rows_striped {
                stripe.get_portion(local, start_col, take, num_cols)?
            } else {
                stripe.get_portion(start_row, local, num_rows, take)?
            };
            if self.rows_striped {
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
        let (a0, alen) = self.axis_range(dest_row, dest_col, portion.num_rows(), portion.num_cols());
        let first = a0 / self.stripe_len;
        let last = (a0 + alen - 1) / self.stripe_len;
        let mut covered = 0;
        for idx in first..=last {
            let stripe = &self.stripes[idx];
            let stripe_start = idx * self.stripe_len;
            let local = (a0 + covered) - stripe_start;
            let stripe_axis_len = if self.rows_striped {
                stripe.num_rows()
            } else {
                stripe.num_cols()
            };
            let take = (stripe_axis_len - local).min(alen - covered);
            let (sub, srow, scol) = if self.rows_striped {
                (
                    portion.sub_portion(covered, 0, take, portion.num_cols())?,
                    local,
                    dest_col,
                )
            } else {
                (
                    portion.sub_portion(0, covered, portion.num_rows(), take)?,
                    dest_row,
                    local,
                )
            };
            stripe.write_portion(&sub, srow, scol)?;
            covered += take;
        }
        Ok(())
    }

    fn transpose(self: Arc<Self>) -> Arc<dyn MatrixStore> {
        let stripes = self.stripes.iter().map(MemStore::transpose_mem).collect();
        NumaStore::from_parts(
            stripes,
            self.stripe_len,
            !self.rows_striped,
            self.ncol,
            self.nrow,
            self.layout.flip(),
            self.dtype,
        )
    }

    fn set_data(&self, op: &dyn SetOperate) -> Result<()> {
        let mut at = 0;
        for stripe in &self.stripes {
            let shifted = if self.rows_striped {
                OffsetSetOperate {
                    inner: op,
                    row_off: at,
                    col_off: 0,
                }
            } else {
                OffsetSetOperate {
                    inner: op,
                    row_off: 0,
                    col_off: at,
                }
            };
            stripe.set_data(&shifted)?;
            at += if self.rows_striped {
                stripe.num_rows()
            } else {
                stripe.num_cols()
            };
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!(
            "numa({}x{}, {} stripes)",
            self.nrow,
            self.ncol,
            self.stripes.len()
        )
    }
}
