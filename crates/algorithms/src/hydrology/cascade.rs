//! Cascading pour-point totals into downstream tiles
//!
//! Values recorded in an [`UpdateLedger`] are written into the weight grid
//! of the downstream tile at the pour-point cells, and the tile is then
//! re-accumulated in full.

use super::flow_accumulation::{AccumulationBackend, AccumulationParams};
use super::flow_direction::step_downstream;
use super::ledger::{UpdateLedger, FDR_VARIABLE};
use fcpg_core::raster::Raster;
use fcpg_core::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// How a ledger value is combined with the weight already in the cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectMode {
    /// Overwrite the cell: the ledger value is the full upstream total
    #[default]
    Replace,
    /// Add to the cell's weight (no-data counts as 0)
    Add,
}

impl FromStr for InjectMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "add" => Ok(Self::Add),
            _ => Err(Error::InvalidParameter {
                name: "mode",
                value: s.to_string(),
                reason: "expected replace or add".to_string(),
            }),
        }
    }
}

impl fmt::Display for InjectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Add => write!(f, "add"),
        }
    }
}

/// Parameters for [`inject`]
#[derive(Debug, Clone, Default)]
pub struct InjectParams {
    pub mode: InjectMode,
    /// Step each pour point one cell along its recorded D8 code first.
    /// Needed when tiles touch but do not overlap.
    pub move_downstream: bool,
    /// Only inject the entry of this upstream tile; all entries if `None`
    pub upstream: Option<String>,
}

/// What [`inject`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectReport {
    /// Cells written
    pub injected: usize,
    /// Coordinates outside the weight grid
    pub skipped: usize,
    /// Ledger entries without the requested variable
    pub missing: usize,
    /// Ledger entries left out because their lists do not line up
    pub rejected: usize,
}

/// Why an entry cannot be injected, if it cannot
fn entry_problem(xs: &[f64], ys: &[f64], values: &[f64], codes: Option<Option<&[f64]>>) -> Option<String> {
    if xs.len() != ys.len() {
        return Some(format!("{} x for {} y coordinates", xs.len(), ys.len()));
    }
    if xs.len() != values.len() {
        return Some(format!("{} coordinates for {} values", xs.len(), values.len()));
    }
    match codes {
        Some(None) => Some(format!("moving pour points downstream needs the {} variable", FDR_VARIABLE)),
        Some(Some(codes)) if codes.len() != xs.len() => {
            Some(format!("{} {} codes for {} coordinates", codes.len(), FDR_VARIABLE, xs.len()))
        }
        _ => None,
    }
}

/// Write the ledger's `variable` values into a copy of `weight`.
///
/// Coordinates falling outside the grid are reported and skipped; the
/// remaining ones are still injected. An entry lacking `variable` is
/// reported and contributes nothing, as is an entry whose coordinate,
/// value and code lists differ in length.
pub fn inject(
    weight: &Raster<f64>,
    ledger: &UpdateLedger,
    variable: &str,
    params: &InjectParams,
) -> Result<(Raster<f64>, InjectReport)> {
    let mut out = weight.clone();
    let mut report = InjectReport::default();
    let cell_size = weight.cell_size();

    for (upstream, entry) in ledger.entries() {
        if params.upstream.as_ref().is_some_and(|u| u != upstream) {
            continue;
        }
        let Some(values) = ledger.get(upstream, variable) else {
            report.missing += 1;
            continue;
        };

        let (xs, ys) = entry.injection_coords();
        let codes = params.move_downstream.then(|| entry.variable(FDR_VARIABLE));
        if let Some(problem) = entry_problem(xs, ys, values, codes) {
            warn!("{}: {} of {}; entry not injected", upstream, problem, variable);
            report.rejected += 1;
            continue;
        }
        let codes = codes.flatten();

        for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
            let (x, y) = match codes {
                Some(codes) => step_downstream(x, y, codes[i] as u8, cell_size),
                None => (x, y),
            };
            let Some((row, col)) = out.cell_at(x, y) else {
                warn!("{}: pour point ({}, {}) is outside the weight grid; skipped", upstream, x, y);
                report.skipped += 1;
                continue;
            };

            let current = out.get(row, col)?;
            let updated = match params.mode {
                InjectMode::Replace => values[i],
                InjectMode::Add if out.is_nodata(current) => {
                    warn!("{}: adding into a no-data cell at ({}, {})", upstream, row, col);
                    values[i]
                }
                InjectMode::Add => current + values[i],
            };
            out.set(row, col, updated)?;
            debug!("{}: {} {} at ({}, {})", upstream, params.mode, values[i], row, col);
            report.injected += 1;
        }
    }

    info!(
        "injected {} values of {} ({} skipped, {} entries missing it, {} rejected)",
        report.injected, variable, report.skipped, report.missing, report.rejected
    );
    Ok((out, report))
}

/// Re-accumulated tile and the injection that produced it
#[derive(Debug, Clone)]
pub struct AdjustedAccumulation {
    pub accumulation: Raster<f64>,
    pub report: InjectReport,
}

/// Inject the ledger's `variable` into `base_weight` and re-accumulate the
/// whole tile.
///
/// `base_weight` is typically [`make_fac_weights`](super::nodata::make_fac_weights)
/// for area totals, or the zero-filled parameter for parameter totals.
pub fn adjust_accumulation(
    backend: &dyn AccumulationBackend,
    fdr: &Raster<u8>,
    base_weight: &Raster<f64>,
    ledger: &UpdateLedger,
    variable: &str,
    inject_params: &InjectParams,
    accum_params: &AccumulationParams,
) -> Result<AdjustedAccumulation> {
    fdr.check_aligned(base_weight)?;
    let (weight, report) = inject(base_weight, ledger, variable, inject_params)?;
    info!("re-accumulating with {} backend", backend.name());
    let accumulation = backend.accumulate(fdr, &weight, accum_params)?;
    Ok(AdjustedAccumulation { accumulation, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_accumulation::InProcess;
    use crate::hydrology::nodata::make_fac_weights;
    use crate::hydrology::pour_points::PourPoint;
    use fcpg_core::GeoTransform;

    fn strip(origin_x: f64, len: usize) -> Raster<u8> {
        let mut fdr = Raster::from_vec(vec![1u8; len], 1, len).unwrap();
        fdr.set_transform(GeoTransform::new(origin_x, 10.0, 10.0, -10.0));
        fdr.set_nodata(Some(0));
        fdr
    }

    fn ledger_with(x: f64, value: f64) -> UpdateLedger {
        let mut ledger = UpdateLedger::new();
        let point = PourPoint { tile_id: "0101".into(), x, y: 5.0, value, fdr: 1 };
        ledger.record_pour_points("0101", &[point]).unwrap();
        ledger
    }

    #[test]
    fn test_add_after_moving_downstream() {
        // Upstream outlet at x = 15 carries 5; downstream tile starts at x = 20
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        let ledger = ledger_with(15.0, 5.0);
        let params = InjectParams {
            mode: InjectMode::Add,
            move_downstream: true,
            upstream: None,
        };

        let plain = InProcess.accumulate(&fdr, &base, &AccumulationParams::inclusive()).unwrap();
        let adjusted = adjust_accumulation(
            &InProcess,
            &fdr,
            &base,
            &ledger,
            "maxUpstreamFAC",
            &params,
            &AccumulationParams::inclusive(),
        )
        .unwrap();

        assert_eq!(adjusted.report.injected, 1);
        let delta = adjusted.accumulation.get(0, 1).unwrap() - plain.get(0, 1).unwrap();
        assert_eq!(delta, 5.0);
    }

    #[test]
    fn test_replace_on_overlapping_cell() {
        // Upstream strip covers x 0..30 (total 3 at x = 25);
        // downstream strip shares that cell
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        let ledger = ledger_with(25.0, 3.0);

        let adjusted = adjust_accumulation(
            &InProcess,
            &fdr,
            &base,
            &ledger,
            "maxUpstreamFAC",
            &InjectParams::default(),
            &AccumulationParams::inclusive(),
        )
        .unwrap();
        // 3 upstream cells + 1 own cell
        assert_eq!(adjusted.accumulation.get(0, 1).unwrap(), 4.0);
    }

    #[test]
    fn test_reinjection_is_idempotent() {
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        let ledger = ledger_with(25.0, 3.0);

        let (once, _) = inject(&base, &ledger, "maxUpstreamFAC", &InjectParams::default()).unwrap();
        let (twice, _) = inject(&once, &ledger, "maxUpstreamFAC", &InjectParams::default()).unwrap();
        assert_eq!(once.data(), twice.data());
        // input untouched
        assert_eq!(base.get(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_out_of_extent_skipped() {
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        let mut ledger = ledger_with(25.0, 3.0);
        let far = PourPoint { tile_id: "0102".into(), x: 500.0, y: 5.0, value: 9.0, fdr: 1 };
        ledger.record_pour_points("0102", &[far]).unwrap();

        let (out, report) = inject(&base, &ledger, "maxUpstreamFAC", &InjectParams::default()).unwrap();
        assert_eq!(report.injected, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(out.get(0, 0).unwrap(), 3.0);
    }

    #[test]
    fn test_missing_variable_and_filter() {
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        let ledger = ledger_with(25.0, 3.0);

        let (_, report) = inject(&base, &ledger, "precip", &InjectParams::default()).unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.injected, 0);

        let params = InjectParams {
            upstream: Some("9999".into()),
            ..Default::default()
        };
        let (out, report) = inject(&base, &ledger, "maxUpstreamFAC", &params).unwrap();
        assert_eq!(report, InjectReport::default());
        assert_eq!(out.data(), base.data());
    }

    #[test]
    fn test_malformed_entry_does_not_block_others() {
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        // 0102 lists two outlets for one pour point; read without validation
        let text = r#"{
            "0101": {"x": [25.0], "y": [5.0], "vars": ["maxUpstreamFAC"], "maxUpstreamFAC": [3.0]},
            "0102": {"x": [25.0], "y": [5.0], "outletX": [25.0, 35.0], "outletY": [5.0, 5.0],
                     "vars": ["maxUpstreamFAC"], "maxUpstreamFAC": [7.0]}
        }"#;
        let ledger: UpdateLedger = serde_json::from_str(text).unwrap();

        let (out, report) = inject(&base, &ledger, "maxUpstreamFAC", &InjectParams::default()).unwrap();
        assert_eq!(report.injected, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(out.get(0, 0).unwrap(), 3.0);
        assert_eq!(out.get(0, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_moving_without_codes_rejects_entry() {
        let fdr = strip(20.0, 2);
        let base = make_fac_weights(&fdr);
        // 0102 carries no FDR codes to step along
        let text = r#"{
            "0101": {"x": [15.0], "y": [5.0], "vars": ["FDR", "maxUpstreamFAC"], "FDR": [1.0], "maxUpstreamFAC": [5.0]},
            "0102": {"x": [25.0], "y": [5.0], "vars": ["maxUpstreamFAC"], "maxUpstreamFAC": [2.0]}
        }"#;
        let ledger = UpdateLedger::from_json(text).unwrap();
        let params = InjectParams { move_downstream: true, ..Default::default() };

        let (out, report) = inject(&base, &ledger, "maxUpstreamFAC", &params).unwrap();
        assert_eq!(report.injected, 1);
        assert_eq!(report.rejected, 1);
        // 0101 stepped from x = 15 into the first cell
        assert_eq!(out.get(0, 0).unwrap(), 5.0);
        assert_eq!(out.get(0, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Replace".parse::<InjectMode>().unwrap(), InjectMode::Replace);
        assert_eq!("add".parse::<InjectMode>().unwrap(), InjectMode::Add);
        assert!("sum".parse::<InjectMode>().is_err());
    }
}
