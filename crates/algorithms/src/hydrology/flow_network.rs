//! Flow network arena built from a D8 flow direction raster
//!
//! Every inside-basin cell points at its downstream parent, or at nothing
//! when it is an outlet (its direction leaves the grid or enters a cell
//! outside the basin). The cells are ordered once, headwaters first, so
//! any accumulation over the network is a single linear pass.

use super::flow_direction::{downstream_cell, is_inside};
use fcpg_core::raster::Raster;
use fcpg_core::{Error, Result};
use tracing::debug;

/// Directed forest of grid cells, indexed `row * cols + col`
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    rows: usize,
    cols: usize,
    parent: Vec<Option<usize>>,
    inside: Vec<bool>,
    order: Vec<usize>,
    outlets: usize,
}

impl FlowNetwork {
    /// Build the network from a TauDEM-encoded D8 raster.
    ///
    /// Fails with [`Error::Algorithm`] if the directions form a cycle.
    pub fn from_d8(fdr: &Raster<u8>) -> Result<Self> {
        let (rows, cols) = fdr.shape();
        let nodata = fdr.nodata();
        let n = rows * cols;

        let mut inside = vec![false; n];
        for (idx, &code) in fdr.data().iter().enumerate() {
            inside[idx] = is_inside(code, nodata);
        }

        let mut parent = vec![None; n];
        let mut in_degree = vec![0u32; n];
        let mut outlets = 0usize;

        for row in 0..rows {
            for col in 0..cols {
                let idx = row * cols + col;
                if !inside[idx] {
                    continue;
                }
                let code = unsafe { fdr.get_unchecked(row, col) };
                match downstream_cell(row, col, code, rows, cols) {
                    Some((nr, nc)) if inside[nr * cols + nc] => {
                        let down = nr * cols + nc;
                        parent[idx] = Some(down);
                        in_degree[down] += 1;
                    }
                    _ => outlets += 1,
                }
            }
        }

        // Kahn's algorithm: headwaters (in-degree 0) first
        let mut stack: Vec<usize> = (0..n).filter(|&i| inside[i] && in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some(down) = parent[idx] {
                in_degree[down] -= 1;
                if in_degree[down] == 0 {
                    stack.push(down);
                }
            }
        }

        let inside_count = inside.iter().filter(|&&b| b).count();
        if order.len() != inside_count {
            return Err(Error::Algorithm(format!(
                "flow directions contain a cycle through {} cells",
                inside_count - order.len()
            )));
        }

        debug!(
            "flow network: {} inside cells, {} outlets",
            inside_count, outlets
        );

        Ok(Self {
            rows,
            cols,
            parent,
            inside,
            order,
            outlets,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx / self.cols, idx % self.cols)
    }

    /// Downstream cell of `idx`, `None` for outlets and outside cells
    #[inline]
    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parent[idx]
    }

    #[inline]
    pub fn is_inside(&self, idx: usize) -> bool {
        self.inside[idx]
    }

    /// Inside-basin cells, every cell before its downstream parent
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn outlet_count(&self) -> usize {
        self.outlets
    }

    pub fn inside_count(&self) -> usize {
        self.order.len()
    }

    /// Sum of `weight` over all cells strictly upstream of each cell.
    ///
    /// `weight` is indexed like the network; outside cells are left at 0.
    pub fn upstream_sums(&self, weight: &[f64]) -> Vec<f64> {
        let mut upstream = vec![0.0; weight.len()];
        for &idx in &self.order {
            if let Some(down) = self.parent[idx] {
                upstream[down] += upstream[idx] + weight[idx];
            }
        }
        upstream
    }

    /// Fold `f` over each cell's upstream area, combining a cell's own
    /// value with the folded values of the cells draining into it.
    ///
    /// `values[idx]` is `None` for cells that contribute nothing. The
    /// result for a cell includes its own value.
    pub fn upstream_fold<F>(&self, values: &[Option<f64>], f: F) -> Vec<Option<f64>>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut folded = values.to_vec();
        for &idx in &self.order {
            if let (Some(down), Some(v)) = (self.parent[idx], folded[idx]) {
                folded[down] = Some(match folded[down] {
                    Some(d) => f(d, v),
                    None => v,
                });
            }
        }
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_headwaters_first() {
        // 1x4 strip flowing east, last cell exits the grid
        let fdr = Raster::from_vec(vec![1u8, 1, 1, 1], 1, 4).unwrap();
        let net = FlowNetwork::from_d8(&fdr).unwrap();

        assert_eq!(net.order(), &[0, 1, 2, 3]);
        assert_eq!(net.outlet_count(), 1);
        assert_eq!(net.parent(2), Some(3));
        assert_eq!(net.parent(3), None);
    }

    #[test]
    fn test_outside_cells_excluded() {
        // Second cell outside: first cell becomes an outlet
        let fdr = Raster::from_vec(vec![1u8, 0, 1, 1], 1, 4).unwrap();
        let net = FlowNetwork::from_d8(&fdr).unwrap();

        assert_eq!(net.inside_count(), 3);
        assert_eq!(net.outlet_count(), 2);
        assert!(!net.is_inside(1));
        assert_eq!(net.parent(0), None);
    }

    #[test]
    fn test_cycle_detected() {
        // E then W: the two cells point at each other
        let fdr = Raster::from_vec(vec![1u8, 5], 1, 2).unwrap();
        let err = FlowNetwork::from_d8(&fdr).unwrap_err();
        assert!(matches!(err, Error::Algorithm(_)));
    }

    #[test]
    fn test_upstream_sums() {
        let fdr = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        let net = FlowNetwork::from_d8(&fdr).unwrap();
        let sums = net.upstream_sums(&[1.0, 2.0, 4.0]);
        assert_eq!(sums, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_upstream_fold_max() {
        let fdr = Raster::from_vec(vec![1u8, 1, 1], 1, 3).unwrap();
        let net = FlowNetwork::from_d8(&fdr).unwrap();
        let folded = net.upstream_fold(&[Some(5.0), None, Some(2.0)], f64::max);
        assert_eq!(folded, vec![Some(5.0), Some(5.0), Some(5.0)]);
    }
}
