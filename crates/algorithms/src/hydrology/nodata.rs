//! No-data tracking for parameter accumulation
//!
//! A parameter grid may be missing values inside the basin. Rather than
//! letting those cells silently count as zero, the cells are classified
//! into a correction raster (1 missing, 0 present, -1 outside the basin)
//! whose accumulation tells, for every cell, how many upstream cells had
//! no data.

use super::flow_accumulation::{AccumulationBackend, AccumulationParams};
use super::flow_direction::is_inside;
use fcpg_core::raster::{Raster, RasterElement};
use fcpg_core::Result;
use tracing::{info, warn};

/// No-data value of a correction raster (cells outside the basin)
pub const CORRECTION_NODATA: i8 = -1;

/// Classify each cell of `param` as missing (1), present (0) or outside
/// the basin (-1).
pub fn classify<T: RasterElement>(param: &Raster<T>, fdr: &Raster<u8>) -> Result<Raster<i8>> {
    fdr.check_aligned(param)?;
    let fdr_nodata = fdr.nodata();
    let param_nodata = param.nodata();

    if param_nodata.is_none() {
        warn!("parameter raster has no no-data value set; only NaN cells count as missing");
    }

    let mut correction = param.map(Some(CORRECTION_NODATA), |v| i8::from(v.is_nodata(param_nodata)));
    for (c, &code) in correction.data_mut().iter_mut().zip(fdr.data().iter()) {
        if !is_inside(code, fdr_nodata) {
            *c = CORRECTION_NODATA;
        }
    }
    Ok(correction)
}

/// Number of cells classified as missing
pub fn missing_count(correction: &Raster<i8>) -> usize {
    correction.data().iter().filter(|&&c| c == 1).count()
}

/// Parameter as f64 with missing inside-basin cells set to 0 and cells
/// outside the basin set to NaN
pub fn zero_missing<T: RasterElement>(param: &Raster<T>, fdr: &Raster<u8>) -> Result<Raster<f64>> {
    fdr.check_aligned(param)?;
    let fdr_nodata = fdr.nodata();
    let param_nodata = param.nodata();

    let mut zeroed = param.map(Some(f64::NAN), |v| {
        if v.is_nodata(param_nodata) {
            0.0
        } else {
            v.to_f64().unwrap_or(0.0)
        }
    });
    for (z, &code) in zeroed.data_mut().iter_mut().zip(fdr.data().iter()) {
        if !is_inside(code, fdr_nodata) {
            *z = f64::NAN;
        }
    }
    Ok(zeroed)
}

/// Weight grid of ones inside the basin and no-data outside.
///
/// Accumulating it gives the flow accumulation (FAC); it is also the base
/// grid pour-point totals are injected into.
pub fn make_fac_weights(fdr: &Raster<u8>) -> Raster<f64> {
    let nodata = fdr.nodata();
    fdr.map(Some(f64::NAN), |code| if is_inside(code, nodata) { 1.0 } else { f64::NAN })
}

/// Correction raster as accumulation weights (outside cells NaN)
pub fn correction_weights(correction: &Raster<i8>) -> Raster<f64> {
    correction.map(Some(f64::NAN), |c| {
        if c == CORRECTION_NODATA {
            f64::NAN
        } else {
            c as f64
        }
    })
}

/// Correction raster and its accumulation
#[derive(Debug, Clone)]
pub struct Correction {
    pub raster: Raster<i8>,
    pub accumulation: Raster<f64>,
}

/// Result of [`accumulate_parameter`]
#[derive(Debug, Clone)]
pub struct ParameterAccumulation {
    /// Accumulated parameter, missing cells counted as zero
    pub accumulation: Raster<f64>,
    /// Present only when the basin had missing cells
    pub correction: Option<Correction>,
    /// Number of missing cells inside the basin
    pub missing_cells: usize,
}

/// Accumulate a parameter grid, tracking its no-data cells.
///
/// Missing inside-basin cells are zeroed before accumulation. When there
/// are any, the correction raster is accumulated too with the same flow
/// directions; when there are none that second pass is skipped.
pub fn accumulate_parameter<T: RasterElement>(
    backend: &dyn AccumulationBackend,
    fdr: &Raster<u8>,
    param: &Raster<T>,
    params: &AccumulationParams,
) -> Result<ParameterAccumulation> {
    let correction = classify(param, fdr)?;
    let missing_cells = missing_count(&correction);
    let weights = zero_missing(param, fdr)?;

    info!("accumulating parameter with {} backend", backend.name());
    let accumulation = backend.accumulate(fdr, &weights, params)?;

    let correction = if missing_cells > 0 {
        warn!("{} parameter cells inside the basin are no-data; accumulating correction", missing_cells);
        let corr_accum = backend.accumulate(fdr, &correction_weights(&correction), params)?;
        Some(Correction {
            raster: correction,
            accumulation: corr_accum,
        })
    } else {
        None
    };

    Ok(ParameterAccumulation {
        accumulation,
        correction,
        missing_cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_accumulation::{accumulate, InProcess};
    use fcpg_core::GeoTransform;

    fn strip() -> Raster<u8> {
        // 1x5 strip flowing east, last cell outside
        let mut fdr = Raster::from_vec(vec![1u8, 1, 1, 1, 0], 1, 5).unwrap();
        fdr.set_transform(GeoTransform::new(0.0, 1.0, 1.0, -1.0));
        fdr.set_nodata(Some(0));
        fdr
    }

    fn param_with_gap(fdr: &Raster<u8>) -> Raster<f32> {
        let mut param = fdr.with_same_meta::<f32>(1, 5);
        param.set_nodata(Some(-9999.0));
        for (i, v) in param.data_mut().iter_mut().enumerate() {
            *v = (i + 1) as f32;
        }
        param.set(0, 1, -9999.0).unwrap();
        param
    }

    #[test]
    fn test_classify() {
        let fdr = strip();
        let corr = classify(&param_with_gap(&fdr), &fdr).unwrap();
        let values: Vec<i8> = corr.data().iter().copied().collect();
        assert_eq!(values, vec![0, 1, 0, 0, -1]);
        assert_eq!(corr.nodata(), Some(-1));
        assert_eq!(missing_count(&corr), 1);
    }

    #[test]
    fn test_correction_idempotence() {
        // accumulate(w) - accumulate(correction) == accumulate(w with missing zeroed)
        let fdr = strip();
        let corr = classify(&param_with_gap(&fdr), &fdr).unwrap();
        let ones = make_fac_weights(&fdr);
        let mut ones_zeroed = ones.clone();
        ones_zeroed.set(0, 1, 0.0).unwrap();

        for params in [AccumulationParams::exclusive(), AccumulationParams::inclusive()] {
            let naive = accumulate(&fdr, &ones, &params).unwrap();
            let corr_acc = accumulate(&fdr, &correction_weights(&corr), &params).unwrap();
            let direct = accumulate(&fdr, &ones_zeroed, &params).unwrap();

            for col in 0..4 {
                let lhs = naive.get(0, col).unwrap() - corr_acc.get(0, col).unwrap();
                assert_eq!(lhs, direct.get(0, col).unwrap(), "col {}", col);
            }
        }
    }

    #[test]
    fn test_no_missing_skips_correction() {
        let fdr = strip();
        let mut param = param_with_gap(&fdr);
        param.set(0, 1, 2.0).unwrap();

        let result = accumulate_parameter(&InProcess, &fdr, &param, &AccumulationParams::inclusive()).unwrap();
        assert_eq!(result.missing_cells, 0);
        assert!(result.correction.is_none());
        assert_eq!(result.accumulation.get(0, 3).unwrap(), 10.0);
    }

    #[test]
    fn test_accumulate_parameter_with_gap() {
        let fdr = strip();
        let param = param_with_gap(&fdr);

        let result = accumulate_parameter(&InProcess, &fdr, &param, &AccumulationParams::inclusive()).unwrap();
        assert_eq!(result.missing_cells, 1);
        // 1 + 0 + 3 + 4
        assert_eq!(result.accumulation.get(0, 3).unwrap(), 8.0);
        let correction = result.correction.unwrap();
        assert_eq!(correction.accumulation.get(0, 3).unwrap(), 1.0);
        assert_eq!(correction.accumulation.get(0, 0).unwrap(), 0.0);
        assert!(result.accumulation.get(0, 4).unwrap().is_nan());
    }
}
