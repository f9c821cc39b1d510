//! Pour points between regional tiles
//!
//! For every sub-basin draining across a tile boundary, the upstream
//! accumulation is clipped to the (buffered) basin polygon and its maximum
//! is taken. A maximum cell is a pour point when one step downstream along
//! its flow direction lands on no-data, i.e. flow leaves the upstream tile
//! there. Interior maxima that do not sit on the tile edge are dropped.

use super::flow_direction::downstream_cell;
use fcpg_core::raster::Raster;
use fcpg_core::vector::Basin;
use fcpg_core::{Algorithm, Error, Result};
use geo::{BoundingRect, Contains};
use geo_types::{LineString, MultiPolygon, Point};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A point where flow crosses from one tile into the next
#[derive(Debug, Clone, PartialEq)]
pub struct PourPoint {
    /// Upstream tile the point drains
    pub tile_id: String,
    /// Map coordinate of the cell center, in the upstream tile
    pub x: f64,
    pub y: f64,
    /// Accumulated value at the point
    pub value: f64,
    /// D8 direction of the cell, used to step into the downstream tile
    pub fdr: u8,
}

/// Parameters for pour point location
#[derive(Debug, Clone, Copy)]
pub struct PourPointParams {
    /// Distance (map units) the basin polygon is grown by before clipping
    pub buffer: f64,
    /// Keep a basin's single maximum cell even when it drains into another
    /// cell of the tile. Off by default: such a cell is an interior maximum,
    /// not an outlet.
    pub keep_interior_maximum: bool,
}

impl Default for PourPointParams {
    fn default() -> Self {
        Self {
            buffer: 50.0,
            keep_interior_maximum: false,
        }
    }
}

/// Pour point locator
#[derive(Debug, Clone, Default)]
pub struct PourPointLocator;

fn segment_distance(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

fn ring_distance(px: f64, py: f64, ring: &LineString<f64>) -> f64 {
    ring.lines()
        .map(|l| segment_distance(px, py, l.start.x, l.start.y, l.end.x, l.end.y))
        .fold(f64::INFINITY, f64::min)
}

/// Whether (x, y) lies inside `polygon` or within `buffer` of its boundary
fn within_buffer(polygon: &MultiPolygon<f64>, x: f64, y: f64, buffer: f64) -> bool {
    if polygon.contains(&Point::new(x, y)) {
        return true;
    }
    buffer > 0.0
        && polygon.0.iter().any(|p| {
            std::iter::once(p.exterior())
                .chain(p.interiors())
                .any(|ring| ring_distance(x, y, ring) <= buffer)
        })
}

/// Cells of `raster` whose centers fall in the buffered polygon
fn clip_cells(raster: &Raster<f64>, polygon: &MultiPolygon<f64>, buffer: f64) -> Vec<(usize, usize)> {
    let Some(rect) = polygon.bounding_rect() else {
        return Vec::new();
    };
    let (rows, cols) = raster.shape();
    let (c0, r0) = raster.geo_to_pixel(rect.min().x - buffer, rect.max().y + buffer);
    let (c1, r1) = raster.geo_to_pixel(rect.max().x + buffer, rect.min().y - buffer);
    if !(c0.is_finite() && c1.is_finite() && r0.is_finite() && r1.is_finite()) {
        return Vec::new();
    }

    let clamp = |v: f64, n: usize| v.floor().max(0.0).min(n as f64) as usize;
    let (row_lo, row_hi) = (clamp(r0.min(r1), rows), clamp(r0.max(r1) + 1.0, rows));
    let (col_lo, col_hi) = (clamp(c0.min(c1), cols), clamp(c0.max(c1) + 1.0, cols));

    let mut cells = Vec::new();
    for row in row_lo..row_hi {
        for col in col_lo..col_hi {
            let (x, y) = raster.pixel_to_geo(col, row);
            if within_buffer(polygon, x, y, buffer) {
                cells.push((row, col));
            }
        }
    }
    cells
}

/// Locate the pour points of `basins` on the upstream tile.
///
/// Every cell tied at a basin's maximum accumulation is tested, so a
/// multi-cell outlet yields several points. Points are deduplicated on
/// the exact (x, y, value) triple; their order is not significant.
pub fn locate_pour_points(
    fac: &Raster<f64>,
    fdr: &Raster<u8>,
    basins: &[&Basin],
    params: PourPointParams,
) -> Result<Vec<PourPoint>> {
    fac.check_aligned(fdr)?;
    if params.buffer < 0.0 {
        return Err(Error::InvalidParameter {
            name: "buffer",
            value: params.buffer.to_string(),
            reason: "must be non-negative".into(),
        });
    }
    let (rows, cols) = fac.shape();
    info!("locating pour points for {} basins", basins.len());

    let mut points = Vec::new();
    let mut seen = HashSet::new();

    for basin in basins {
        let cells: Vec<(usize, usize, f64)> = clip_cells(fac, &basin.polygon, params.buffer)
            .into_iter()
            .filter_map(|(r, c)| {
                let v = unsafe { fac.get_unchecked(r, c) };
                (!fac.is_nodata(v)).then_some((r, c, v))
            })
            .collect();

        let Some(max) = cells.iter().map(|&(_, _, v)| v).reduce(f64::max) else {
            warn!("basin {} does not overlap the accumulation grid", basin.id);
            continue;
        };
        let tied: Vec<(usize, usize)> = cells
            .iter()
            .filter(|&&(_, _, v)| v == max)
            .map(|&(r, c, _)| (r, c))
            .collect();

        let make_point = |row: usize, col: usize| {
            let (x, y) = fac.pixel_to_geo(col, row);
            PourPoint {
                tile_id: basin.tile_id().to_string(),
                x,
                y,
                value: max,
                fdr: unsafe { fdr.get_unchecked(row, col) },
            }
        };

        let on_edge: Vec<PourPoint> = tied
            .iter()
            .filter(|&&(row, col)| {
                let code = unsafe { fdr.get_unchecked(row, col) };
                match downstream_cell(row, col, code, rows, cols) {
                    Some((nr, nc)) => fac.is_nodata(unsafe { fac.get_unchecked(nr, nc) }),
                    None => true,
                }
            })
            .map(|&(row, col)| make_point(row, col))
            .collect();

        let found = if !on_edge.is_empty() {
            on_edge
        } else if tied.len() == 1 && params.keep_interior_maximum {
            warn!(
                "basin {}: maximum does not drain off the tile; keeping it as the pour point",
                basin.id
            );
            vec![make_point(tied[0].0, tied[0].1)]
        } else {
            warn!(
                "basin {}: none of {} maximum cells drains off the tile; no pour point",
                basin.id,
                tied.len()
            );
            Vec::new()
        };

        for point in found {
            if seen.insert((point.x.to_bits(), point.y.to_bits(), point.value.to_bits())) {
                debug!("pour point ({}, {}) = {}", point.x, point.y, point.value);
                points.push(point);
            }
        }
    }

    info!("found {} pour points", points.len());
    Ok(points)
}

/// Pour point at the global maximum of an accumulation grid.
///
/// Suits tiles that drain through a single outlet. Ties resolve to the
/// first cell in row-major order.
pub fn find_fac_pour_point(fac: &Raster<f64>, fdr: &Raster<u8>, tile_id: &str) -> Result<Option<PourPoint>> {
    fac.check_aligned(fdr)?;
    let (_, cols) = fac.shape();
    let mut best: Option<(usize, f64)> = None;
    for (idx, &v) in fac.data().iter().enumerate() {
        if fac.is_nodata(v) {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((idx, v));
        }
    }

    Ok(best.map(|(idx, value)| {
        let (row, col) = (idx / cols, idx % cols);
        let (x, y) = fac.pixel_to_geo(col, row);
        PourPoint {
            tile_id: tile_id.to_string(),
            x,
            y,
            value,
            fdr: unsafe { fdr.get_unchecked(row, col) },
        }
    }))
}

/// Sample `raster` at each pour point.
///
/// Points outside the raster or on no-data give `None` and a warning.
pub fn pour_point_values(points: &[PourPoint], raster: &Raster<f64>) -> Vec<Option<f64>> {
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    sample_at(raster, &xs, &ys)
}

/// Sample `raster` at map coordinates, `None` off the grid or on no-data
pub fn sample_at(raster: &Raster<f64>, xs: &[f64], ys: &[f64]) -> Vec<Option<f64>> {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| match raster.cell_at(x, y) {
            Some((row, col)) => {
                let v = unsafe { raster.get_unchecked(row, col) };
                if raster.is_nodata(v) {
                    warn!("pour point ({}, {}) samples no-data", x, y);
                    None
                } else {
                    Some(v)
                }
            }
            None => {
                warn!("pour point ({}, {}) lies outside the raster", x, y);
                None
            }
        })
        .collect()
}

impl Algorithm for PourPointLocator {
    type Input = (Raster<f64>, Raster<u8>, Vec<Basin>);
    type Output = Vec<PourPoint>;
    type Params = PourPointParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Pour Points"
    }

    fn description(&self) -> &'static str {
        "Locate the cells where flow leaves a tile through boundary sub-basins"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let (fac, fdr, basins) = input;
        let refs: Vec<&Basin> = basins.iter().collect();
        locate_pour_points(&fac, &fdr, &refs, params)
    }
}
