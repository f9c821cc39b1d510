//! Flow-conditioned parameter grid (FCPG)
//!
//! Divides an accumulated parameter by the upstream area to give the mean
//! upstream parameter value at every cell:
//!
//! ```text
//! fcpg = param_accum / (area_accum - correction_accum + 1)
//! ```
//!
//! The `+ 1` is applied to whatever area grid is given, so headwater
//! cells never divide by zero.

use crate::maybe_rayon::*;
use fcpg_core::raster::Raster;
use fcpg_core::{Algorithm, Error, Result};
use ndarray::Array2;
use tracing::{info, warn};

/// Default no-data value of an FCPG raster
pub const FCPG_NODATA: f32 = -9999.0;

/// Parameters for FCPG reduction
#[derive(Debug, Clone, Copy)]
pub struct FcpgParams {
    /// Cells whose effective upstream area is below this are set to no-data
    pub min_accum: Option<f64>,
    /// Output no-data value; must lie outside the parameter's value range
    pub nodata: f32,
}

impl Default for FcpgParams {
    fn default() -> Self {
        Self {
            min_accum: None,
            nodata: FCPG_NODATA,
        }
    }
}

/// FCPG raster with the anomalies found while computing it
#[derive(Debug, Clone)]
pub struct FcpgOutput {
    pub raster: Raster<f32>,
    /// Cells forced to no-data by `min_accum`
    pub masked_cells: usize,
    /// Cells whose effective area was negative after correction,
    /// masked ones included
    pub negative_cells: usize,
    /// Cells whose effective area was -1, written as no-data
    pub zero_divisor_cells: usize,
}

/// Accumulated rasters feeding an FCPG reduction
#[derive(Debug, Clone)]
pub struct FcpgInput {
    pub param_accum: Raster<f64>,
    pub area_accum: Raster<f64>,
    pub correction_accum: Option<Raster<f64>>,
}

/// FCPG reduction algorithm
#[derive(Debug, Clone, Default)]
pub struct Fcpg;

impl Algorithm for Fcpg {
    type Input = FcpgInput;
    type Output = FcpgOutput;
    type Params = FcpgParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "FCPG"
    }

    fn description(&self) -> &'static str {
        "Mean upstream parameter value from accumulated parameter and area grids"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        make_fcpg(
            &input.param_accum,
            &input.area_accum,
            input.correction_accum.as_ref(),
            params,
        )
    }
}

#[derive(Default)]
struct Cell {
    value: Option<f32>,
    masked: bool,
    negative: bool,
    zero_divisor: bool,
}

/// Compute the FCPG from accumulated parameter and area rasters.
///
/// Cells where any input is no-data get `params.nodata`. A negative
/// effective area is logged and counted whether or not `min_accum` masks
/// the cell; its ratio is still written. An effective area of exactly -1
/// leaves nothing to divide by, so that cell is counted and set to no-data.
pub fn make_fcpg(
    param_accum: &Raster<f64>,
    area_accum: &Raster<f64>,
    correction_accum: Option<&Raster<f64>>,
    params: FcpgParams,
) -> Result<FcpgOutput> {
    param_accum.check_aligned(area_accum)?;
    if let Some(corr) = correction_accum {
        param_accum.check_aligned(corr)?;
    }
    let (rows, cols) = param_accum.shape();
    info!(
        "computing FCPG ({}x{}, corrected = {}, min_accum = {:?})",
        rows,
        cols,
        correction_accum.is_some(),
        params.min_accum
    );

    let cells: Vec<Cell> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let p = unsafe { param_accum.get_unchecked(row, col) };
                    let a = unsafe { area_accum.get_unchecked(row, col) };
                    let c = match correction_accum {
                        Some(corr) => unsafe { corr.get_unchecked(row, col) },
                        None => 0.0,
                    };
                    let missing = param_accum.is_nodata(p)
                        || area_accum.is_nodata(a)
                        || correction_accum.is_some_and(|corr| corr.is_nodata(c));
                    if missing {
                        return Cell::default();
                    }

                    let effective = a - c;
                    let mut cell = Cell {
                        negative: effective < 0.0,
                        ..Cell::default()
                    };
                    if params.min_accum.is_some_and(|t| effective < t) {
                        cell.masked = true;
                    } else if effective + 1.0 == 0.0 {
                        cell.zero_divisor = true;
                    } else {
                        cell.value = Some((p / (effective + 1.0)) as f32);
                    }
                    cell
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut masked_cells = 0usize;
    let mut negative_cells = 0usize;
    let mut zero_divisor_cells = 0usize;
    let data: Vec<f32> = cells
        .into_iter()
        .map(|cell| {
            masked_cells += cell.masked as usize;
            negative_cells += cell.negative as usize;
            zero_divisor_cells += cell.zero_divisor as usize;
            cell.value.unwrap_or(params.nodata)
        })
        .collect();

    if negative_cells > 0 {
        warn!(
            "{} cells have negative effective accumulation after correction",
            negative_cells
        );
    }
    if zero_divisor_cells > 0 {
        warn!(
            "{} cells have an effective accumulation of -1 and no defined ratio; set to no-data",
            zero_divisor_cells
        );
    }

    let mut raster = param_accum.with_same_meta::<f32>(rows, cols);
    raster.set_nodata(Some(params.nodata));
    *raster.data_mut() =
        Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;

    info!("FCPG done: {} cells below min_accum", masked_cells);
    Ok(FcpgOutput {
        raster,
        masked_cells,
        negative_cells,
        zero_divisor_cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row(values: &[f64]) -> Raster<f64> {
        let mut r = Raster::from_vec(values.to_vec(), 1, values.len()).unwrap();
        r.set_nodata(Some(f64::NAN));
        r
    }

    #[test]
    fn test_min_accum_boundary() {
        let param = row(&[10.0, 20.0, 30.0]);
        let area = row(&[1.0, 4.0, 3.0]);
        let out = make_fcpg(
            &param,
            &area,
            None,
            FcpgParams {
                min_accum: Some(3.0),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(out.raster.get(0, 0).unwrap(), FCPG_NODATA);
        assert_relative_eq!(out.raster.get(0, 1).unwrap(), 4.0);
        // exactly at the threshold is kept
        assert_relative_eq!(out.raster.get(0, 2).unwrap(), 7.5);
        assert_eq!(out.masked_cells, 1);
    }

    #[test]
    fn test_correction_reduces_area() {
        let param = row(&[12.0]);
        let area = row(&[5.0]);
        let corr = row(&[2.0]);
        let out = make_fcpg(&param, &area, Some(&corr), FcpgParams::default()).unwrap();
        assert_relative_eq!(out.raster.get(0, 0).unwrap(), 3.0);
    }

    #[test]
    fn test_negative_effective_area_flagged() {
        let param = row(&[4.0]);
        let area = row(&[1.0]);
        let corr = row(&[4.0]);
        let out = make_fcpg(&param, &area, Some(&corr), FcpgParams::default()).unwrap();
        assert_eq!(out.negative_cells, 1);
        assert_relative_eq!(out.raster.get(0, 0).unwrap(), -2.0);
    }

    #[test]
    fn test_negative_area_counted_under_min_accum() {
        let param = row(&[4.0, 9.0]);
        let area = row(&[1.0, 5.0]);
        let corr = row(&[4.0, 0.0]);
        let params = FcpgParams {
            min_accum: Some(1.0),
            ..Default::default()
        };
        let out = make_fcpg(&param, &area, Some(&corr), params).unwrap();
        assert_eq!(out.masked_cells, 1);
        assert_eq!(out.negative_cells, 1);
        assert_eq!(out.raster.get(0, 0).unwrap(), FCPG_NODATA);
        assert_relative_eq!(out.raster.get(0, 1).unwrap(), 1.5);
    }

    #[test]
    fn test_zero_divisor_is_nodata() {
        let param = row(&[3.0, 3.0]);
        let area = row(&[2.0, 2.0]);
        let corr = row(&[3.0, 0.0]);
        let out = make_fcpg(&param, &area, Some(&corr), FcpgParams::default()).unwrap();
        assert_eq!(out.zero_divisor_cells, 1);
        assert_eq!(out.negative_cells, 1);
        assert_eq!(out.raster.get(0, 0).unwrap(), FCPG_NODATA);
        assert!(out.raster.data().iter().all(|v| v.is_finite()));
        assert_relative_eq!(out.raster.get(0, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_nodata_propagates() {
        let param = row(&[f64::NAN, 6.0]);
        let area = row(&[0.0, f64::NAN]);
        let out = make_fcpg(&param, &area, None, FcpgParams::default()).unwrap();
        assert_eq!(out.raster.get(0, 0).unwrap(), FCPG_NODATA);
        assert_eq!(out.raster.get(0, 1).unwrap(), FCPG_NODATA);
    }

    #[test]
    fn test_algorithm_trait() {
        let input = FcpgInput {
            param_accum: row(&[10.0, 20.0]),
            area_accum: row(&[1.0, 4.0]),
            correction_accum: None,
        };
        let out = Fcpg
            .execute(input, FcpgParams { min_accum: Some(3.0), ..Default::default() })
            .unwrap();
        assert_eq!(out.raster.get(0, 0).unwrap(), FCPG_NODATA);
        assert_relative_eq!(out.raster.get(0, 1).unwrap(), 4.0);
    }
}
