//! Weighted flow accumulation
//!
//! Sums a weight raster downstream along D8 flow directions. Each cell
//! receives the total weight of every cell draining through it, computed
//! in one topological pass over the [`FlowNetwork`].

use super::flow_network::FlowNetwork;
use fcpg_core::raster::{Raster, RasterElement};
use fcpg_core::{Algorithm, Error, Result};
use ndarray::Array2;
use tracing::{info, warn};

/// Parameters for flow accumulation
#[derive(Debug, Clone, Copy)]
pub struct AccumulationParams {
    /// Add each cell's own weight to its total.
    ///
    /// `true` (default): a cell holds its own weight plus everything draining
    /// into it, so a basin outlet holds the sum of all weights in the basin.
    /// `false`: a headwater cell holds 0 and a cell holds the weight of the
    /// cells strictly upstream of it.
    pub include_self: bool,
    /// Value written to cells outside the basin
    pub nodata: f64,
}

impl Default for AccumulationParams {
    fn default() -> Self {
        Self {
            include_self: true,
            nodata: f64::NAN,
        }
    }
}

impl AccumulationParams {
    pub fn inclusive() -> Self {
        Self::default()
    }

    /// Totals of the cells strictly upstream, headwaters at 0
    pub fn exclusive() -> Self {
        Self {
            include_self: false,
            ..Self::default()
        }
    }
}

/// Flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<u8>;
    type Output = Raster<f64>;
    type Params = AccumulationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Calculate upstream contributing area from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let ones = input.map(None, |_| 1.0f64);
        accumulate(&input, &ones, &params)
    }
}

/// Backend performing the downstream summation.
///
/// [`InProcess`] walks the flow network directly; `ExternalBackend`
/// delegates to a TauDEM `aread8` run. Both produce the same totals.
pub trait AccumulationBackend: Send + Sync {
    fn name(&self) -> &str;

    fn accumulate(
        &self,
        fdr: &Raster<u8>,
        weight: &Raster<f64>,
        params: &AccumulationParams,
    ) -> Result<Raster<f64>>;
}

/// In-process topological accumulation
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcess;

impl AccumulationBackend for InProcess {
    fn name(&self) -> &str {
        "in-process"
    }

    fn accumulate(
        &self,
        fdr: &Raster<u8>,
        weight: &Raster<f64>,
        params: &AccumulationParams,
    ) -> Result<Raster<f64>> {
        accumulate(fdr, weight, params)
    }
}

/// Calculate the unweighted flow accumulation (FAC) of a D8 raster.
///
/// Each cell receives a count of all upstream cells that flow into it.
/// Headwater cells (no upstream neighbors) have accumulation = 0.
pub fn flow_accumulation(flow_dir: &Raster<u8>) -> Result<Raster<f64>> {
    FlowAccumulation.execute(flow_dir.clone(), AccumulationParams::exclusive())
}

/// Accumulate `weight` downstream along `fdr`.
///
/// Weights at no-data cells inside the basin contribute nothing; they are
/// counted and reported, see `accumulate_parameter` for the corrected
/// pipeline. Cells outside the basin get `params.nodata`.
///
/// # Arguments
/// * `fdr` - TauDEM-encoded D8 flow direction raster
/// * `weight` - Values to accumulate, aligned with `fdr`
///
/// # Returns
/// Raster<f64> with accumulated totals
pub fn accumulate<T: RasterElement>(
    fdr: &Raster<u8>,
    weight: &Raster<T>,
    params: &AccumulationParams,
) -> Result<Raster<f64>> {
    fdr.check_aligned(weight)?;
    let (rows, cols) = fdr.shape();
    info!(
        "accumulating {}x{} weight grid (include_self = {})",
        rows, cols, params.include_self
    );

    let network = FlowNetwork::from_d8(fdr)?;
    let (weights, missing) = weight_vector(&network, weight);
    if missing > 0 {
        warn!("{} inside-basin weight cells are no-data and contribute nothing", missing);
    }

    let out = accumulate_network(&network, &weights, params);
    let mut output = fdr.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(params.nodata));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), out)
        .map_err(|e| Error::Other(e.to_string()))?;

    info!(
        "accumulated {} cells draining to {} outlets",
        network.inside_count(),
        network.outlet_count()
    );
    Ok(output)
}

/// Per-cell weights of the inside cells as f64, no-data mapped to 0.
/// Returns the weights and the number of no-data cells inside the basin.
pub(crate) fn weight_vector<T: RasterElement>(network: &FlowNetwork, weight: &Raster<T>) -> (Vec<f64>, usize) {
    let nodata = weight.nodata();
    let mut missing = 0usize;
    let weights = weight
        .data()
        .iter()
        .enumerate()
        .map(|(idx, v)| {
            if !network.is_inside(idx) {
                return 0.0;
            }
            match v.to_f64() {
                Some(w) if !v.is_nodata(nodata) && !w.is_nan() => w,
                _ => {
                    missing += 1;
                    0.0
                }
            }
        })
        .collect();
    (weights, missing)
}

/// Accumulated totals over a built network, outside cells set to `params.nodata`
pub(crate) fn accumulate_network(network: &FlowNetwork, weights: &[f64], params: &AccumulationParams) -> Vec<f64> {
    let upstream = network.upstream_sums(weights);

    let mut negative = 0usize;
    let out: Vec<f64> = upstream
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(idx, (&up, &w))| {
            if !network.is_inside(idx) {
                return params.nodata;
            }
            let total = if params.include_self { up + w } else { up };
            if total < 0.0 {
                negative += 1;
            }
            total
        })
        .collect();

    if negative > 0 {
        warn!("{} cells have a negative accumulated total; check the weight grid", negative);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcpg_core::GeoTransform;

    /// 3x3 grid draining to the bottom-center cell, which exits south
    fn converging_3x3() -> Raster<u8> {
        let mut fdr = Raster::from_vec(vec![8u8, 7, 6, 8, 7, 6, 1, 7, 5], 3, 3).unwrap();
        fdr.set_transform(GeoTransform::new(0.0, 3.0, 1.0, -1.0));
        fdr.set_nodata(Some(0));
        fdr
    }

    #[test]
    fn test_flow_accumulation_linear() {
        // 1x5 strip flowing east
        // Acc:  0      1      2       3       4
        let fdr = Raster::from_vec(vec![1u8; 5], 1, 5).unwrap();
        let acc = flow_accumulation(&fdr).unwrap();

        assert_eq!(acc.get(0, 0).unwrap(), 0.0); // Headwater
        assert_eq!(acc.get(0, 1).unwrap(), 1.0);
        assert_eq!(acc.get(0, 2).unwrap(), 2.0);
        assert_eq!(acc.get(0, 3).unwrap(), 3.0);
        assert_eq!(acc.get(0, 4).unwrap(), 4.0); // Outlet
    }

    #[test]
    fn test_flow_accumulation_convergent() {
        let fdr = converging_3x3();
        let acc = flow_accumulation(&fdr).unwrap();

        let outlet = acc.get(2, 1).unwrap();
        assert_eq!(outlet, 8.0, "Outlet should accumulate all 8 cells, got {}", outlet);
        assert_eq!(acc.get(1, 1).unwrap(), 3.0);
        assert_eq!(acc.get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_conservation_inclusive() {
        let fdr = converging_3x3();
        let mut weight = fdr.with_same_meta::<f64>(3, 3);
        let mut total = 0.0;
        for (i, v) in weight.data_mut().iter_mut().enumerate() {
            *v = (i as f64 + 1.0) * 0.5;
            total += *v;
        }

        let acc = accumulate(&fdr, &weight, &AccumulationParams::inclusive()).unwrap();
        assert!(
            (acc.get(2, 1).unwrap() - total).abs() < 1e-9,
            "Outlet should hold the basin total {}",
            total
        );
    }

    #[test]
    fn test_monotonic_downstream() {
        let fdr = converging_3x3();
        let weight = fdr.map(None, |_| 2.0f64);
        let acc = accumulate(&fdr, &weight, &AccumulationParams::inclusive()).unwrap();

        for row in 0..3 {
            for col in 0..3 {
                let code = fdr.get(row, col).unwrap();
                if let Some((nr, nc)) = super::super::flow_direction::downstream_cell(row, col, code, 3, 3) {
                    assert!(acc.get(nr, nc).unwrap() >= acc.get(row, col).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_outside_cells_get_nodata() {
        let mut fdr = converging_3x3();
        fdr.set(0, 0, 0).unwrap();
        let acc = flow_accumulation(&fdr).unwrap();

        assert!(acc.get(0, 0).unwrap().is_nan());
        assert_eq!(acc.get(2, 1).unwrap(), 7.0);
    }

    #[test]
    fn test_default_counts_own_weight() {
        // 1x4 strip flowing east, weight 5 everywhere
        let fdr = Raster::from_vec(vec![1u8; 4], 1, 4).unwrap();
        let weight = fdr.map(None, |_| 5.0f64);

        let acc = accumulate(&fdr, &weight, &AccumulationParams::default()).unwrap();
        let totals: Vec<f64> = acc.data().iter().copied().collect();
        assert_eq!(totals, vec![5.0, 10.0, 15.0, 20.0]);

        let area = FlowAccumulation.execute_default(fdr.clone()).unwrap();
        assert_eq!(area.get(0, 0).unwrap(), 1.0);
        assert_eq!(area.get(0, 3).unwrap(), 4.0);

        let upstream_only = accumulate(&fdr, &weight, &AccumulationParams::exclusive()).unwrap();
        assert_eq!(upstream_only.get(0, 0).unwrap(), 0.0);
        assert_eq!(upstream_only.get(0, 3).unwrap(), 15.0);
    }

    #[test]
    fn test_misaligned_weight_rejected() {
        let fdr = converging_3x3();
        let weight: Raster<f64> = Raster::new(3, 4);
        assert!(matches!(
            accumulate(&fdr, &weight, &AccumulationParams::default()),
            Err(Error::SizeMismatch { .. })
        ));
    }
}
