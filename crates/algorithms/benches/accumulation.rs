//! Benchmarks for the accumulation engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fcpg_algorithms::hydrology::{
    accumulate, accumulate_parameter, d8_to_dinf, decay_accumulation, make_fac_weights, make_fcpg,
    AccumulationParams, FcpgParams, InProcess,
};
use fcpg_core::{GeoTransform, Raster};

/// D8 grid draining to the bottom of the center column: every cell flows
/// sideways to the center column, which flows south.
fn create_valley_fdr(size: usize) -> Raster<u8> {
    let mut fdr = Raster::new(size, size);
    fdr.set_transform(GeoTransform::new(0.0, size as f64 * 30.0, 30.0, -30.0));
    fdr.set_nodata(Some(0));
    let center = size / 2;
    for row in 0..size {
        for col in 0..size {
            let code = match col.cmp(&center) {
                std::cmp::Ordering::Less => 1,
                std::cmp::Ordering::Greater => 5,
                std::cmp::Ordering::Equal => 7,
            };
            fdr.set(row, col, code).unwrap();
        }
    }
    fdr
}

/// Parameter grid with a sprinkling of no-data cells
fn create_param(fdr: &Raster<u8>) -> Raster<f32> {
    let (rows, cols) = fdr.shape();
    let mut param = fdr.with_same_meta::<f32>(rows, cols);
    param.set_nodata(Some(-9999.0));
    for (i, v) in param.data_mut().iter_mut().enumerate() {
        *v = if i % 97 == 0 { -9999.0 } else { (i % 13) as f32 };
    }
    param
}

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/in_process");
    for size in [256, 512, 1024, 2048] {
        let fdr = create_valley_fdr(size);
        let weights = make_fac_weights(&fdr);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| accumulate(black_box(&fdr), black_box(&weights), &AccumulationParams::default()).unwrap())
        });
    }
    group.finish();
}

fn bench_parameter_with_correction(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/parameter_corrected");
    for size in [256, 512, 1024] {
        let fdr = create_valley_fdr(size);
        let param = create_param(&fdr);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                accumulate_parameter(&InProcess, black_box(&fdr), black_box(&param), &AccumulationParams::default())
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_fcpg(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/fcpg");
    for size in [512, 1024, 2048] {
        let fdr = create_valley_fdr(size);
        let area = accumulate(&fdr, &make_fac_weights(&fdr), &AccumulationParams::default()).unwrap();
        let param = area.map(Some(f64::NAN), |a| a * 2.5);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| make_fcpg(black_box(&param), black_box(&area), None, FcpgParams::default()).unwrap())
        });
    }
    group.finish();
}

fn bench_decay(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulation/decay");
    for size in [256, 512, 1024] {
        let fdr = create_valley_fdr(size);
        let angles = d8_to_dinf(&fdr).unwrap();
        let decay = angles.map(Some(0.0), |_| 0.9);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                decay_accumulation(black_box(&angles), black_box(&decay), None, &AccumulationParams::default())
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_accumulate,
    bench_parameter_with_correction,
    bench_fcpg,
    bench_decay
);
criterion_main!(benches);
