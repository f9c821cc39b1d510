//! # FCPG Algorithms
//!
//! Flow accumulation and flow-conditioned parameter grids over tiled basins.
//!
//! ## Pipeline
//!
//! - **accumulation**: D8 flow directions to weighted upstream totals, with
//!   no-data correction rasters for incomplete parameter grids
//! - **FCPG**: accumulated parameter divided by upstream area
//! - **cascade**: pour points of an upstream tile recorded in a ledger and
//!   injected into the downstream tile before it is re-accumulated
//! - **decay**: D-infinity accumulation attenuated with distance to streams

pub(crate) mod maybe_rayon;

pub mod hydrology;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        accumulate, accumulate_parameter, adjust_accumulation, decay_accumulation, flow_accumulation,
        inject, locate_pour_points, make_decay_grid, make_fac_weights, make_fcpg, AccumulationBackend,
        AccumulationParams, D8Format, ExternalBackend, FcpgParams, FlowAccumulation, InProcess, InjectMode,
        InjectParams, PourPoint, PourPointParams, UpdateLedger,
    };
    pub use fcpg_core::prelude::*;
}
