//! Parallel processing strategies

use fcpg_core::{Error, Result};
use rayon::prelude::*;
use std::str::FromStr;

/// Processing mode for independent work items (tiles)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with a fixed number of workers
    ParallelWith(usize),
}

impl FromStr for ProcessingMode {
    type Err = Error;

    /// `sequential`, `parallel`, or a worker count
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "parallel" | "par" => Ok(Self::Parallel),
            n => match n.parse::<usize>() {
                Ok(0) | Err(_) => Err(Error::InvalidParameter {
                    name: "mode",
                    value: s.to_string(),
                    reason: "expected sequential, parallel or a positive worker count".to_string(),
                }),
                Ok(1) => Ok(Self::Sequential),
                Ok(n) => Ok(Self::ParallelWith(n)),
            },
        }
    }
}

/// Strategy for parallel execution
pub trait ParallelStrategy {
    /// Map a function over items and collect the results in item order
    fn par_map<I, T, F>(&self, items: &[I], f: F) -> Result<Vec<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> T + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    fn par_map<I, T, F>(&self, items: &[I], f: F) -> Result<Vec<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => Ok(items.iter().map(f).collect()),
            ProcessingMode::Parallel => Ok(items.par_iter().map(f).collect()),
            ProcessingMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(*threads)
                    .build()
                    .map_err(|e| Error::Other(format!("failed to build thread pool: {}", e)))?;
                Ok(pool.install(|| items.par_iter().map(f).collect()))
            }
        }
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

/// Configure the global thread pool
pub fn set_num_threads(threads: usize) {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok(); // Ignore if already initialized
}
