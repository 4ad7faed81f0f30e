//! Parallel read configuration
//!
//! Raster reads for one assembly run on a dedicated, bounded Rayon pool so a
//! long list of remote granules never opens more connections than asked for.
//! Results are always reassembled in input order.

use crate::errors::{OperaError, Result};
use crate::raster::RasterFrame;
use crate::store::RasterStore;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

/// Configuration for parallel raster reads
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Worker count; `None` means one per CPU core
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// Read one raster at a time, in order
    pub fn sequential() -> Self {
        Self::with_threads(1)
    }

    /// Create a configuration that uses all available CPU cores
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    /// Create a configuration that uses a specific number of threads
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }

    /// Number of workers this configuration will start
    pub fn threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Build a pool private to one call
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let threads = self.threads();
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("opera-read-{i}"))
            .build()
            .map_err(|e| {
                OperaError::ThreadPoolError(format!(
                    "Failed to initialize thread pool with {threads} threads: {e}"
                ))
            })
    }

    /// Open every location through `store`, returning frames in input order
    ///
    /// The first failure aborts the batch; frames already read are dropped.
    pub fn read_all<S: RasterStore + ?Sized>(
        &self,
        store: &S,
        locations: &[&str],
    ) -> Result<Vec<RasterFrame>> {
        if self.threads() == 1 || locations.len() <= 1 {
            return locations.iter().map(|loc| store.open(loc)).collect();
        }
        let pool = self.build_pool()?;
        debug!(
            threads = pool.current_num_threads(),
            rasters = locations.len(),
            "Reading rasters in parallel"
        );
        pool.install(|| locations.par_iter().map(|loc| store.open(loc)).collect())
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone)]
pub struct ParallelInfo {
    pub available_cores: usize,
    pub available_parallelism: usize,
}

/// Get information about the host's parallelism
pub fn get_parallel_info() -> ParallelInfo {
    ParallelInfo {
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
    }
}
