//! Stream network extraction and stream-relative tools
//!
//! Cells whose flow accumulation reaches a threshold are stream cells.
//! From that network this module derives the D8 flow distance of every
//! cell to the nearest stream downslope, and masks other rasters to the
//! stream cells.

use super::flow_direction::D8_DIST;
use super::flow_network::FlowNetwork;
use fcpg_core::raster::{Raster, RasterElement};
use fcpg_core::{Error, Result};
use ndarray::Array2;
use tracing::{info, warn};

/// Parameters for stream network extraction
#[derive(Debug, Clone)]
pub struct StreamNetworkParams {
    /// Flow accumulation threshold, in the units of the accumulation.
    /// Cells with accumulation >= this value are streams.
    /// Default: 1000.0
    pub threshold: f64,
}

impl Default for StreamNetworkParams {
    fn default() -> Self {
        Self { threshold: 1000.0 }
    }
}

fn is_stream(fac: &Raster<f64>, value: f64, threshold: f64) -> bool {
    !fac.is_nodata(value) && value >= threshold
}

/// Extract the stream network from a flow accumulation raster.
///
/// # Returns
/// Raster<u8> with 1 = stream cell, 0 = non-stream cell
pub fn stream_network(flow_acc: &Raster<f64>, params: StreamNetworkParams) -> Result<Raster<u8>> {
    let (rows, cols) = flow_acc.shape();
    let threshold = params.threshold;

    let mut output_data = Array2::<u8>::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            let acc = unsafe { flow_acc.get_unchecked(row, col) };
            if is_stream(flow_acc, acc, threshold) {
                output_data[(row, col)] = 1;
            }
        }
    }

    let mut output = flow_acc.with_same_meta::<u8>(rows, cols);
    output.set_nodata(Some(0));
    *output.data_mut() = output_data;

    let streams = output.data().iter().filter(|&&v| v == 1).count();
    info!("{} stream cells at threshold {}", streams, threshold);
    Ok(output)
}

/// Keep `raster` only on stream cells; everything else becomes no-data.
///
/// Uses the raster's own no-data value, or the type default if it has none.
pub fn mask_streams<T: RasterElement>(
    raster: &Raster<T>,
    flow_acc: &Raster<f64>,
    params: StreamNetworkParams,
) -> Result<Raster<T>> {
    raster.check_aligned(flow_acc)?;
    let nodata = raster.nodata().unwrap_or_else(T::default_nodata);

    let mut output = raster.clone();
    output.set_nodata(Some(nodata));
    for (v, &acc) in output.data_mut().iter_mut().zip(flow_acc.data().iter()) {
        if !is_stream(flow_acc, acc, params.threshold) {
            *v = nodata;
        }
    }
    Ok(output)
}

/// D8 flow distance (map units) from every cell to the first stream cell
/// on its flow path.
///
/// Stream cells are 0. Cells whose path leaves the basin without meeting
/// a stream, and cells outside the basin, are NaN.
pub fn distance_to_stream(
    flow_dir: &Raster<u8>,
    flow_acc: &Raster<f64>,
    params: StreamNetworkParams,
) -> Result<Raster<f64>> {
    flow_dir.check_aligned(flow_acc)?;
    let (rows, cols) = flow_dir.shape();
    let cell_size = flow_dir.cell_size();
    if !flow_dir.transform().has_square_cells() {
        warn!("grid cells are not square; distances use the x cell size {}", cell_size);
    }
    info!("distance to streams (threshold {})", params.threshold);

    let network = FlowNetwork::from_d8(flow_dir)?;
    let mut distance = vec![f64::NAN; rows * cols];

    // Outlets first, so every parent is resolved before its donors
    for &idx in network.order().iter().rev() {
        let (row, col) = network.coords(idx);
        let acc = unsafe { flow_acc.get_unchecked(row, col) };
        if is_stream(flow_acc, acc, params.threshold) {
            distance[idx] = 0.0;
            continue;
        }
        if let Some(down) = network.parent(idx) {
            let code = unsafe { flow_dir.get_unchecked(row, col) };
            let step = D8_DIST[(code - 1) as usize] * cell_size;
            distance[idx] = distance[down] + step;
        }
    }

    let unreached = network
        .order()
        .iter()
        .filter(|&&idx| distance[idx].is_nan())
        .count();
    if unreached > 0 {
        warn!("{} cells drain out of the basin without reaching a stream", unreached);
    }

    let mut output = flow_dir.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() =
        Array2::from_shape_vec((rows, cols), distance).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}
