//! Built-in portion initializers
//!
//! Initializers implement [`SetOperate`] and are driven by `set_data` over
//! destination portions. They must be re-entrant: the same initializer runs
//! concurrently over disjoint runs.

use super::SetOperate;
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::kernel::dispatch_dtype;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

/// Fill every element with one value
pub struct ConstFill {
    value: Scalar,
}

impl ConstFill {
    /// Initializer writing `value` everywhere
    pub fn new(value: Scalar) -> Self {
        Self { value }
    }
}

impl SetOperate for ConstFill {
    fn dtype(&self) -> DType {
        self.value.dtype()
    }

    fn set(&self, dest: &mut [u8], n: usize, _row_idx: usize, _col_idx: usize) {
        let size = self.value.dtype().size_in_bytes();
        for i in 0..n {
            dest[i * size..(i + 1) * size].copy_from_slice(self.value.as_bytes());
        }
    }
}

/// Fill element `i` with `from + i * by`
///
/// Meant for vectors (degenerate matrices), where the linear index of a run
/// start is `row_idx + col_idx`.
pub struct SeqInit {
    dtype: DType,
    from: f64,
    by: f64,
}

impl SeqInit {
    /// Sequence starting at `from`, stepping by `by`
    pub fn new(dtype: DType, from: f64, by: f64) -> Self {
        Self { dtype, from, by }
    }
}

impl SetOperate for SeqInit {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn set(&self, dest: &mut [u8], n: usize, row_idx: usize, col_idx: usize) {
        let start = row_idx + col_idx;
        dispatch_dtype!(self.dtype, T => {
            let out: &mut [T] = bytemuck::cast_slice_mut(dest);
            for i in 0..n {
                out[i] = <T as crate::dtype::Element>::from_f64(
                    self.from + (start + i) as f64 * self.by,
                );
            }
        });
    }
}

/// Fill with uniform random values in `[min, max)`
///
/// The generator is seeded per run from the base seed and the run's global
/// coordinates, so runs are reproducible and the initializer stays
/// re-entrant across workers.
pub struct RandInit {
    dtype: DType,
    dist: Uniform<f64>,
    seed: u64,
}

impl RandInit {
    /// Uniform initializer over `[min, max)`
    pub fn new(dtype: DType, min: f64, max: f64, seed: u64) -> Result<Self> {
        let dist = Uniform::new(min, max)
            .map_err(|_| Error::incompatible_operator("random_init", "invalid bounds"))?;
        Ok(Self { dtype, dist, seed })
    }

    fn rng_for(&self, row_idx: usize, col_idx: usize) -> StdRng {
        let mix = (row_idx as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .rotate_left(17)
            ^ (col_idx as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        StdRng::seed_from_u64(self.seed ^ mix)
    }
}

impl SetOperate for RandInit {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn set(&self, dest: &mut [u8], n: usize, row_idx: usize, col_idx: usize) {
        let mut rng = self.rng_for(row_idx, col_idx);
        dispatch_dtype!(self.dtype, T => {
            let out: &mut [T] = bytemuck::cast_slice_mut(dest);
            for v in out.iter_mut().take(n) {
                *v = <T as crate::dtype::Element>::from_f64(self.dist.sample(&mut rng));
            }
        });
    }
}
