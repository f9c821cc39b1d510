//! Hydrological algorithms for flow-conditioned parameter grids
//!
//! - Flow direction: TauDEM/ESRI D8 encodings, D8 to D-infinity angles
//! - Flow network: arena forest with a precomputed topological order
//! - Flow accumulation: weighted upstream sums, in-process or via TauDEM
//! - No-data tracking: correction rasters for missing parameter cells
//! - FCPG: mean upstream parameter value
//! - Pour points and the update ledger: cross-tile cascading
//! - Decay accumulation: D-infinity accumulation attenuated by distance to streams
//! - Stream tools: stream extraction, masking, distance to stream, extreme upslope value

mod cascade;
mod decay;
mod external;
mod extreme_upslope;
mod fcpg;
pub(crate) mod flow_accumulation;
pub(crate) mod flow_direction;
mod flow_network;
mod ledger;
mod nodata;
mod pour_points;
mod stream_network;

pub use cascade::{adjust_accumulation, inject, AdjustedAccumulation, InjectMode, InjectParams, InjectReport};
pub use decay::{
    decay_accumulation, dinf_receivers, make_decay_grid, DecayFunction, DecayGridParams, DECAY_NODATA,
};
pub use external::ExternalBackend;
pub use extreme_upslope::{extreme_upslope, Extreme, ExtremeUpslopeParams};
pub use fcpg::{make_fcpg, Fcpg, FcpgInput, FcpgOutput, FcpgParams, FCPG_NODATA};
pub use flow_accumulation::{
    accumulate, flow_accumulation, AccumulationBackend, AccumulationParams, FlowAccumulation, InProcess,
};
pub use flow_direction::{
    convert_d8_format, d8_to_dinf, downstream_cell, is_inside, step_downstream, ConvertD8, ConvertD8Params,
    D8Format, D8_DIST, D8_OFFSETS, ESRI_NODATA, TAUDEM_NODATA,
};
pub use flow_network::FlowNetwork;
pub use ledger::{LedgerEntry, UpdateLedger, FAC_VARIABLE, FDR_VARIABLE};
pub use nodata::{
    accumulate_parameter, classify, correction_weights, make_fac_weights, missing_count, zero_missing,
    Correction, ParameterAccumulation, CORRECTION_NODATA,
};
pub use pour_points::{
    find_fac_pour_point, locate_pour_points, pour_point_values, sample_at, PourPoint, PourPointLocator,
    PourPointParams,
};
pub use stream_network::{distance_to_stream, mask_streams, stream_network, StreamNetworkParams};
