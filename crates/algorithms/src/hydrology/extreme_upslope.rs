//! Extreme upslope value: the maximum or minimum of a parameter over each
//! cell's upstream area (the cell itself included)

use super::flow_network::FlowNetwork;
use super::stream_network::{mask_streams, StreamNetworkParams};
use fcpg_core::raster::{Raster, RasterElement};
use fcpg_core::{Error, Result};
use ndarray::Array2;
use std::str::FromStr;
use tracing::info;

/// Which extreme to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extreme {
    #[default]
    Max,
    Min,
}

impl FromStr for Extreme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            _ => Err(Error::InvalidParameter {
                name: "extreme",
                value: s.to_string(),
                reason: "expected max or min".to_string(),
            }),
        }
    }
}

/// Parameters for [`extreme_upslope`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtremeUpslopeParams {
    pub extreme: Extreme,
    /// Keep only cells whose accumulation reaches this threshold
    /// (requires an accumulation raster)
    pub stream_threshold: Option<f64>,
}

/// Maximum or minimum of `param` over the upstream area of every cell.
///
/// No-data parameter cells are ignored; a cell with no valid value
/// upstream, or outside the basin, is NaN. With a `stream_threshold` and
/// `flow_acc`, non-stream cells are set to NaN as well.
pub fn extreme_upslope<T: RasterElement>(
    flow_dir: &Raster<u8>,
    param: &Raster<T>,
    flow_acc: Option<&Raster<f64>>,
    params: ExtremeUpslopeParams,
) -> Result<Raster<f64>> {
    flow_dir.check_aligned(param)?;
    let (rows, cols) = flow_dir.shape();
    info!("extreme upslope {:?} ({}x{})", params.extreme, rows, cols);

    let network = FlowNetwork::from_d8(flow_dir)?;
    let nodata = param.nodata();
    let values: Vec<Option<f64>> = param
        .data()
        .iter()
        .enumerate()
        .map(|(idx, v)| {
            if !network.is_inside(idx) || v.is_nodata(nodata) {
                None
            } else {
                v.to_f64()
            }
        })
        .collect();

    let folded = match params.extreme {
        Extreme::Max => network.upstream_fold(&values, f64::max),
        Extreme::Min => network.upstream_fold(&values, f64::min),
    };

    let data: Vec<f64> = folded
        .into_iter()
        .enumerate()
        .map(|(idx, v)| match v {
            Some(v) if network.is_inside(idx) => v,
            _ => f64::NAN,
        })
        .collect();

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    match (params.stream_threshold, flow_acc) {
        (Some(threshold), Some(fac)) => mask_streams(&output, fac, StreamNetworkParams { threshold }),
        (Some(_), None) => Err(Error::InvalidParameter {
            name: "stream_threshold",
            value: "set".to_string(),
            reason: "masking to streams needs a flow accumulation raster".to_string(),
        }),
        _ => Ok(output),
    }
}
