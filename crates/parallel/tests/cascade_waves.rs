//! A two-tile cascade driven by the wave scheduler

use fcpg_algorithms::hydrology::{
    adjust_accumulation, find_fac_pour_point, make_fac_weights, AccumulationBackend, AccumulationParams, InProcess,
    InjectMode, InjectParams, UpdateLedger, FAC_VARIABLE,
};
use fcpg_core::{GeoTransform, Raster, Result};
use fcpg_parallel::{run_waves, ProcessingMode, TileGraph};
use std::collections::BTreeMap;
use std::sync::Mutex;

fn strip_tile(origin_x: f64, len: usize) -> Raster<u8> {
    let mut fdr = Raster::from_vec(vec![1u8; len], 1, len).unwrap();
    fdr.set_transform(GeoTransform::new(origin_x, 10.0, 10.0, -10.0));
    fdr.set_nodata(Some(0));
    fdr
}

#[test]
fn upstream_tiles_finish_before_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("0102_ledger.json");

    let tiles: BTreeMap<&str, Raster<u8>> = [("0101", strip_tile(0.0, 3)), ("0102", strip_tile(30.0, 2))]
        .into_iter()
        .collect();
    let graph = TileGraph::from_edge_list("0101 0102").unwrap();
    let outlets = Mutex::new(BTreeMap::new());
    let params = AccumulationParams::inclusive();

    let results = run_waves(ProcessingMode::Parallel, &graph, |tile| -> Result<()> {
        let fdr = &tiles[tile];
        let base = make_fac_weights(fdr);
        let fac = if tile == "0102" {
            let ledger = UpdateLedger::load(&ledger_path)?;
            let inject = InjectParams {
                mode: InjectMode::Add,
                move_downstream: true,
                upstream: None,
            };
            adjust_accumulation(&InProcess, fdr, &base, &ledger, FAC_VARIABLE, &inject, &params)?.accumulation
        } else {
            InProcess.accumulate(fdr, &base, &params)?
        };

        if let Some(point) = find_fac_pour_point(&fac, fdr, tile)? {
            if tile == "0101" {
                let mut ledger = UpdateLedger::load_or_default(&ledger_path)?;
                ledger.record_pour_points(tile, &[point.clone()])?;
                ledger.save(&ledger_path)?;
            }
            outlets.lock().unwrap().insert(tile.to_string(), point.value);
        }
        Ok(())
    })
    .unwrap();

    assert!(results.iter().all(|(_, r)| r.is_ok()));
    let outlets = outlets.into_inner().unwrap();
    assert_eq!(outlets["0101"], 3.0);
    // 3 cascaded cells plus the 2 cells of the downstream tile
    assert_eq!(outlets["0102"], 5.0);
}
