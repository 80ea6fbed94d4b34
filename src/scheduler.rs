//! Portion-mapply scheduler
//!
//! The scheduler turns virtual stores into materialized results. Output
//! portions are the work items: each one gathers aligned input portions,
//! runs the operator, and writes the result into a fresh in-memory store.
//! Within one materialize call every output portion completes before the
//! call returns; a failed portion aborts the whole materialization and the
//! partial output is dropped.

use crate::config;
use crate::dtype::Scalar;
use crate::error::Result;
use crate::kernel::{AggOperate, BulkOperate};
use crate::store::virtual_store::{aligned_portion, PortionMapplyOp};
use crate::store::{Layout, LocalStore, MatrixStore, MemStore};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::OnceLock;

/// The engine's worker pool, sized by `EngineConfig::num_workers`
pub(crate) fn pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config::config().num_workers)
            .thread_name(|i| format!("blockmat-worker-{i}"))
            .build()
            .expect("worker pool construction cannot fail with a positive thread count")
    })
}

/// Output tiles of a shape, chunked along the long axis
pub(crate) fn portion_tiles(nrow: usize, ncol: usize) -> Vec<(usize, usize, usize, usize)> {
    let cfg = config::config();
    let mut tiles = Vec::new();
    if nrow >= ncol {
        let step = cfg.portion_rows.min(nrow).max(1);
        let mut r = 0;
        while r < nrow {
            let nr = step.min(nrow - r);
            tiles.push((r, 0, nr, ncol));
            r += nr;
        }
    } else {
        let step = cfg.portion_cols.min(ncol).max(1);
        let mut c = 0;
        while c < ncol {
            let nc = step.min(ncol - c);
            tiles.push((0, c, nrow, nc));
            c += nc;
        }
    }
    tiles
}

/// Materialize `op` over `inputs` into a new in-memory store
///
/// Portions across inputs are aligned on the output shape; inputs that
/// don't share a dimension with the output (broadcast vectors, inner
/// operands) are read whole per portion. Virtual inputs compute their
/// portions on demand, which evaluates operator trees hierarchically
/// without buffering intermediates.
pub fn mapply_portions(
    inputs: &[Arc<dyn MatrixStore>],
    op: Arc<dyn PortionMapplyOp>,
    out_layout: Layout,
    par: bool,
) -> Result<Arc<dyn MatrixStore>> {
    let (nrow, ncol) = (op.out_num_rows(), op.out_num_cols());
    let dtype = op.out_dtype();
    let out = MemStore::new(nrow, ncol, out_layout, dtype)?;
    let tiles = portion_tiles(nrow, ncol);
    tracing::debug!(
        rows = nrow,
        cols = ncol,
        tiles = tiles.len(),
        parallel = par,
        "materializing portions"
    );

    let run_tile = |&(r0, c0, nr, nc): &(usize, usize, usize, usize)| -> Result<()> {
        let ins: Vec<LocalStore> = inputs
            .iter()
            .map(|input| aligned_portion(input, nrow, ncol, r0, c0, nr, nc))
            .collect::<Result<_>>()?;
        let mut local = LocalStore::new_owned(r0, c0, nr, nc, out_layout, dtype)?;
        op.run(&ins, &mut local)?;
        out.write_portion(&local, r0, c0)
    };

    if par && tiles.len() > 1 {
        pool().install(|| tiles.par_iter().try_for_each(run_tile))?;
    } else {
        tiles.iter().try_for_each(run_tile)?;
    }
    Ok(out)
}

/// Co-materialize a set of matrices over a shared portion schedule
///
/// Work items are interleaved tile-major so sibling matrices touch their
/// common inputs close together in time; an input store with portion
/// caching enabled is then read once per portion rather than once per
/// matrix. Already-concrete stores pass through unchanged.
pub fn co_materialize(
    stores: &[Arc<dyn MatrixStore>],
    par: bool,
) -> Result<Vec<Arc<dyn MatrixStore>>> {
    let outs: Vec<Option<Arc<MemStore>>> = stores
        .iter()
        .map(|s| {
            if s.is_virtual() {
                MemStore::new(s.num_rows(), s.num_cols(), s.store_layout(), s.dtype()).map(Some)
            } else {
                Ok(None)
            }
        })
        .collect::<Result<_>>()?;

    let per_store_tiles: Vec<Vec<(usize, usize, usize, usize)>> = stores
        .iter()
        .map(|s| portion_tiles(s.num_rows(), s.num_cols()))
        .collect();
    let max_tiles = per_store_tiles.iter().map(Vec::len).max().unwrap_or(0);

    let mut items = Vec::new();
    for ti in 0..max_tiles {
        for (si, tiles) in per_store_tiles.iter().enumerate() {
            if outs[si].is_some() {
                if let Some(&tile) = tiles.get(ti) {
                    items.push((si, tile));
                }
            }
        }
    }

    let run_item = |&(si, (r0, c0, nr, nc)): &(usize, (usize, usize, usize, usize))| -> Result<()> {
        let portion = stores[si].get_portion(r0, c0, nr, nc)?;
        outs[si]
            .as_ref()
            .expect("only virtual stores are scheduled")
            .write_portion(&portion, r0, c0)
    };

    if par && items.len() > 1 {
        pool().install(|| items.par_iter().try_for_each(run_item))?;
    } else {
        items.iter().try_for_each(run_item)?;
    }

    Ok(stores
        .iter()
        .zip(outs)
        .map(|(s, out)| match out {
            Some(out) => out as Arc<dyn MatrixStore>,
            None => Arc::clone(s),
        })
        .collect())
}

/// Reduce a whole store to one scalar with a binary fold
///
/// Portions produce partials in parallel; the partials are folded with the
/// same kernel in portion order.
pub fn aggregate_store(store: &Arc<dyn MatrixStore>, op: BulkOperate) -> Result<Scalar> {
    let dtype = op.output_dtype();
    let agg = AggOperate::new(dtype, op.op());
    let tiles = portion_tiles(store.num_rows(), store.num_cols());

    let run_tile = |&(r0, c0, nr, nc): &(usize, usize, usize, usize)| -> Result<Scalar> {
        let portion = store.get_portion(r0, c0, nr, nc)?;
        agg.run(portion.as_bytes())
    };

    let partials: Vec<Scalar> = if tiles.len() > 1 {
        pool().install(|| tiles.par_iter().map(run_tile).collect::<Result<_>>())?
    } else {
        tiles.iter().map(run_tile).collect::<Result<_>>()?
    };

    let mut bytes = Vec::with_capacity(partials.len() * dtype.size_in_bytes());
    for p in &partials {
        bytes.extend_from_slice(p.as_bytes());
    }
    agg.run(&bytes)
}
