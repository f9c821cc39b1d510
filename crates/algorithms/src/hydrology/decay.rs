//! Decayed D-infinity accumulation
//!
//! Flow from each cell is split between the two D8 neighbors bracketing
//! its D-infinity angle, in proportion to the angular offset (Tarboton,
//! 1997). Every contribution is multiplied by the decay value of the
//! receiving cell, so the influence of upslope cells fades with distance
//! from the stream network.
//!
//! The decay multipliers are usually built from distance-to-stream with
//! [`make_decay_grid`].

use super::flow_accumulation::AccumulationParams;
use super::flow_direction::D8_OFFSETS;
use crate::maybe_rayon::*;
use fcpg_core::raster::Raster;
use fcpg_core::{Error, Result};
use ndarray::Array2;
use std::collections::VecDeque;
use std::f64::consts::FRAC_PI_4;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// No-data value of a decay grid
pub const DECAY_NODATA: f64 = 0.0;

/// Fractions below this are treated as no flow
const MIN_FRACTION: f64 = 1e-9;

/// Shape of the decay with distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecayFunction {
    /// `exp(-d * cs / cs^k)`
    #[default]
    Exponential,
    /// `cs / (d + k * cs)`
    Inverse,
}

impl FromStr for DecayFunction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exponential" | "exp" => Ok(Self::Exponential),
            "inverse" | "inv" => Ok(Self::Inverse),
            _ => Err(Error::InvalidParameter {
                name: "function",
                value: s.to_string(),
                reason: "expected exponential or inverse".to_string(),
            }),
        }
    }
}

/// Parameters for [`make_decay_grid`]
#[derive(Debug, Clone, Copy)]
pub struct DecayGridParams {
    /// 2 gives moderate decay; larger decays slower, smaller faster
    pub k: f64,
    pub function: DecayFunction,
}

impl Default for DecayGridParams {
    fn default() -> Self {
        Self {
            k: 2.0,
            function: DecayFunction::Exponential,
        }
    }
}

/// Decay multipliers from a distance-to-stream raster (map units).
///
/// Cells with no distance get [`DECAY_NODATA`].
pub fn make_decay_grid(distance: &Raster<f64>, params: DecayGridParams) -> Result<Raster<f64>> {
    let cs = distance.cell_size();
    if params.function == DecayFunction::Inverse && params.k <= 0.0 {
        return Err(Error::InvalidParameter {
            name: "k",
            value: params.k.to_string(),
            reason: "inverse decay needs k > 0".to_string(),
        });
    }
    if !distance.transform().has_square_cells() {
        warn!("grid cells are not square; decay uses the x cell size {}", cs);
    }
    info!("building {:?} decay grid (k = {}, cell size = {})", params.function, params.k, cs);

    let scale = cs.powf(params.k);
    let grid = distance.map(Some(DECAY_NODATA), |d| {
        if distance.is_nodata(d) {
            DECAY_NODATA
        } else {
            match params.function {
                DecayFunction::Exponential => (-d * cs / scale).exp(),
                DecayFunction::Inverse => cs / (d + params.k * cs),
            }
        }
    });
    Ok(grid)
}

/// The two receivers of a D-infinity angle with their flow fractions.
///
/// The angle is radians counter-clockwise from east; negative or NaN
/// angles have no receivers.
pub fn dinf_receivers(angle: f64) -> Option<[(usize, f64); 2]> {
    if angle.is_nan() || angle < 0.0 {
        return None;
    }
    let angle = angle % (8.0 * FRAC_PI_4);
    let facet = ((angle / FRAC_PI_4).floor() as usize).min(7);
    let frac_b = ((angle - facet as f64 * FRAC_PI_4) / FRAC_PI_4).clamp(0.0, 1.0);
    Some([(facet, 1.0 - frac_b), ((facet + 1) % 8, frac_b)])
}

fn neighbor(row: usize, col: usize, dir: usize, rows: usize, cols: usize) -> Option<usize> {
    let (dr, dc) = D8_OFFSETS[dir];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
        return None;
    }
    Some(nr as usize * cols + nc as usize)
}

/// Decayed accumulation over a D-infinity angle raster.
///
/// `weight` defaults to 1 per cell (area). A cell's value is its own
/// weight plus, for every donor, `donor_value * fraction * decay[cell]`;
/// `params.include_self = false` subtracts the own weight afterwards.
///
/// Cells are resolved with a worklist: a cell is finalized once all of its
/// donors are. Directions that never resolve form a cycle and are an
/// [`Error::Algorithm`].
pub fn decay_accumulation(
    angles: &Raster<f64>,
    decay: &Raster<f64>,
    weight: Option<&Raster<f64>>,
    params: &AccumulationParams,
) -> Result<Raster<f64>> {
    angles.check_aligned(decay)?;
    if let Some(w) = weight {
        angles.check_aligned(w)?;
    }
    let (rows, cols) = angles.shape();
    let n = rows * cols;
    info!(
        "decayed D-infinity accumulation ({}x{}, weighted = {})",
        rows,
        cols,
        weight.is_some()
    );

    let inside: Vec<bool> = angles.data().iter().map(|&a| !angles.is_nodata(a)).collect();

    // Outflow edges: (receiver, fraction), at most two per cell
    let edges: Vec<Vec<(usize, f64)>> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let angle = unsafe { angles.get_unchecked(row, col) };
                    if angles.is_nodata(angle) {
                        return Vec::new();
                    }
                    dinf_receivers(angle)
                        .into_iter()
                        .flatten()
                        .filter(|&(_, f)| f > MIN_FRACTION)
                        .filter_map(|(dir, f)| {
                            neighbor(row, col, dir, rows, cols)
                                .filter(|&r| inside[r])
                                .map(|r| (r, f))
                        })
                        .collect()
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut own = vec![0.0f64; n];
    let mut missing_weight = 0usize;
    let mut missing_decay = 0usize;
    let mut multiplier = vec![0.0f64; n];
    for idx in 0..n {
        if !inside[idx] {
            continue;
        }
        let (row, col) = (idx / cols, idx % cols);
        own[idx] = match weight {
            Some(w) => {
                let v = unsafe { w.get_unchecked(row, col) };
                if w.is_nodata(v) {
                    missing_weight += 1;
                    0.0
                } else {
                    v
                }
            }
            None => 1.0,
        };
        let d = unsafe { decay.get_unchecked(row, col) };
        multiplier[idx] = if decay.is_nodata(d) {
            missing_decay += 1;
            0.0
        } else {
            d
        };
    }
    if missing_weight > 0 {
        warn!("{} weight cells inside the basin are no-data; counted as 0", missing_weight);
    }
    if missing_decay > 0 {
        warn!("{} decay cells inside the basin are no-data; treated as full decay", missing_decay);
    }

    let mut donors = vec![0u32; n];
    for out in &edges {
        for &(r, _) in out {
            donors[r] += 1;
        }
    }

    let mut acc = own.clone();
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| inside[i] && donors[i] == 0).collect();
    let mut resolved = 0usize;
    while let Some(idx) = queue.pop_front() {
        resolved += 1;
        let value = acc[idx];
        for &(r, f) in &edges[idx] {
            acc[r] += value * f * multiplier[r];
            donors[r] -= 1;
            if donors[r] == 0 {
                queue.push_back(r);
            }
        }
    }

    let inside_count = inside.iter().filter(|&&b| b).count();
    if resolved < inside_count {
        return Err(Error::Algorithm(format!(
            "D-infinity directions form a cycle through {} cells",
            inside_count - resolved
        )));
    }
    debug!("resolved {} cells", resolved);

    let data: Vec<f64> = (0..n)
        .map(|i| {
            if !inside[i] {
                params.nodata
            } else if params.include_self {
                acc[i]
            } else {
                acc[i] - own[i]
            }
        })
        .collect();

    let mut output = angles.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(params.nodata));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}
