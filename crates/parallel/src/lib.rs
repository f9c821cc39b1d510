//! # FCPG Parallel
//!
//! Tile-level parallelism for FCPG batches.
//!
//! Accumulation within a tile is one sequential topological pass, so work
//! is spread across tiles instead:
//! - Processing modes: sequential, all cores, or a fixed worker count
//! - Tile dependency graph: independent tiles grouped into waves that
//!   respect upstream-to-downstream order

pub mod schedule;
pub mod strategy;

pub use schedule::{run_waves, TileGraph};
pub use strategy::{num_cpus, set_num_threads, ParallelStrategy, ProcessingMode};
