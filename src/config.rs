//! Process-wide engine configuration
//!
//! The configuration is set once at startup with [`init`] and read everywhere
//! else with [`config`]. Portion dimensions decide the tile size used by the
//! scheduler for materialization and external-memory I/O.

use std::sync::OnceLock;

/// Engine configuration, fixed for the lifetime of the process
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of rows in a portion of a tall matrix
    pub portion_rows: usize,
    /// Number of columns in a portion of a wide matrix
    pub portion_cols: usize,
    /// Worker pool size for portion-parallel materialization
    pub num_workers: usize,
    /// Approximate per-core cache size in bytes; informs inner-kernel tiling
    pub cpu_cache_size: usize,
    /// Traverse portions in Hilbert order for 2D operators
    ///
    /// Only meaningful to sparse operators layered on top of this crate;
    /// dense materialization ignores it.
    pub hilbert_order: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            portion_rows: 16 * 1024,
            portion_cols: 16 * 1024,
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            cpu_cache_size: 256 * 1024,
            hilbert_order: false,
        }
    }
}

static CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Install the engine configuration
///
/// Returns `false` if a configuration was already installed (the first one
/// wins; reading the config freezes the defaults).
pub fn init(config: EngineConfig) -> bool {
    CONFIG.set(config).is_ok()
}

/// The active engine configuration
///
/// Falls back to [`EngineConfig::default`] if [`init`] was never called.
pub fn config() -> &'static EngineConfig {
    CONFIG.get_or_init(EngineConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = EngineConfig::default();
        assert!(c.portion_rows > 0);
        assert!(c.portion_cols > 0);
        assert!(c.num_workers >= 1);
        assert!(!c.hilbert_order);
    }
}
