//! Tile dependency graph and wave scheduling
//!
//! A downstream tile may only be accumulated once every tile draining
//! into it has recorded its pour points. Tiles are therefore grouped into
//! waves: the tiles of a wave depend only on tiles of earlier waves and
//! run in parallel with each other.

use crate::strategy::{ParallelStrategy, ProcessingMode};
use fcpg_core::vector::BasinCollection;
use fcpg_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Directed graph of tiles, edges pointing downstream
#[derive(Debug, Clone, Default)]
pub struct TileGraph {
    downstream: BTreeMap<String, BTreeSet<String>>,
}

impl TileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tile with no edges (no-op if present)
    pub fn add_tile(&mut self, tile: &str) {
        self.downstream.entry(tile.to_string()).or_default();
    }

    /// Record that `upstream` drains into `downstream`
    pub fn add_edge(&mut self, upstream: &str, downstream: &str) {
        self.add_tile(downstream);
        self.downstream
            .entry(upstream.to_string())
            .or_default()
            .insert(downstream.to_string());
    }

    /// Tile graph from basin identifiers: an edge for every basin whose
    /// downstream basin lies in another tile.
    pub fn from_basins(basins: &BasinCollection) -> Self {
        let mut graph = Self::new();
        for basin in basins.iter() {
            let tile = basin.tile_id();
            graph.add_tile(tile);
            if let Some(down) = basin.downstream_tile_id() {
                if down != tile {
                    graph.add_edge(tile, down);
                }
            }
        }
        graph
    }

    /// Parse an edge list: one `upstream downstream` pair per line, a
    /// single id for an isolated tile. `#` starts a comment.
    pub fn from_edge_list(text: &str) -> Result<Self> {
        let mut graph = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            let fields: Vec<&str> = line.split(|c: char| c.is_whitespace() || c == ',').filter(|f| !f.is_empty()).collect();
            match fields.as_slice() {
                [] => {}
                [tile] => graph.add_tile(tile),
                [up, down] => graph.add_edge(up, down),
                _ => {
                    return Err(Error::InvalidParameter {
                        name: "edges",
                        value: line.to_string(),
                        reason: format!("line {}: expected `upstream downstream`", lineno + 1),
                    })
                }
            }
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.downstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downstream.is_empty()
    }

    /// Tiles draining directly into `tile`
    pub fn upstream_of(&self, tile: &str) -> Vec<&str> {
        self.downstream
            .iter()
            .filter(|(_, downs)| downs.contains(tile))
            .map(|(up, _)| up.as_str())
            .collect()
    }

    /// Tiles grouped in topological waves, ids sorted inside each wave.
    ///
    /// Fails with [`Error::Algorithm`] naming the tiles caught in a cycle.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: BTreeMap<&str, usize> = self.downstream.keys().map(|t| (t.as_str(), 0)).collect();
        for downs in self.downstream.values() {
            for d in downs {
                if let Some(n) = in_degree.get_mut(d.as_str()) {
                    *n += 1;
                }
            }
        }

        let mut waves = Vec::new();
        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &n)| n == 0)
            .map(|(&t, _)| t)
            .collect();
        let mut scheduled = 0usize;

        while !current.is_empty() {
            scheduled += current.len();
            let mut next = BTreeSet::new();
            for tile in &current {
                for d in self.downstream.get(*tile).into_iter().flatten() {
                    if let Some(n) = in_degree.get_mut(d.as_str()) {
                        *n -= 1;
                        if *n == 0 {
                            next.insert(d.as_str());
                        }
                    }
                }
            }
            waves.push(current.iter().map(|t| t.to_string()).collect());
            current = next.into_iter().collect();
        }

        if scheduled < self.downstream.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|&(_, &n)| n > 0)
                .map(|(&t, _)| t)
                .collect();
            return Err(Error::Algorithm(format!(
                "tile graph has a cycle through {}",
                stuck.join(", ")
            )));
        }
        Ok(waves)
    }
}

/// Run `f` for every tile, wave by wave, tiles of a wave in parallel.
///
/// Stops after the first wave in which any tile fails. Returns the result
/// of every tile that ran, in wave order.
pub fn run_waves<T, F>(mode: ProcessingMode, graph: &TileGraph, f: F) -> Result<Vec<(String, Result<T>)>>
where
    T: Send,
    F: Fn(&str) -> Result<T> + Sync + Send,
{
    let waves = graph.waves()?;
    info!("running {} tiles in {} waves", graph.len(), waves.len());

    let mut results = Vec::with_capacity(graph.len());
    for (i, wave) in waves.iter().enumerate() {
        info!("wave {}: {}", i + 1, wave.join(", "));
        let outcomes = mode.par_map(wave, |tile| f(tile))?;
        let failed = outcomes.iter().filter(|r| r.is_err()).count();
        results.extend(wave.iter().cloned().zip(outcomes));
        if failed > 0 {
            warn!("{} tiles failed in wave {}; stopping", failed, i + 1);
            break;
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn chain() -> TileGraph {
        // 0101 and 0102 drain into 0103, which drains into 0104; 0201 is isolated
        TileGraph::from_edge_list(
            "# upstream downstream\n0101 0103\n0102,0103\n0103 0104\n0201\n",
        )
        .unwrap()
    }

    #[test]
    fn test_waves() {
        let waves = chain().waves().unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["0101".to_string(), "0102".into(), "0201".into()],
                vec!["0103".to_string()],
                vec!["0104".to_string()],
            ]
        );
        assert_eq!(chain().upstream_of("0103"), vec!["0101", "0102"]);
    }

    #[test]
    fn test_cycle_is_error() {
        let mut graph = chain();
        graph.add_edge("0104", "0101");
        match graph.waves() {
            Err(Error::Algorithm(msg)) => {
                assert!(msg.contains("0101") && msg.contains("0104"), "{}", msg)
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_edge_line() {
        assert!(TileGraph::from_edge_list("0101 0102 0103").is_err());
    }

    #[test]
    fn test_run_waves_order() {
        let seen = Mutex::new(Vec::new());
        let results = run_waves(ProcessingMode::ParallelWith(2), &chain(), |tile| {
            seen.lock().unwrap().push(tile.to_string());
            Ok(tile.len())
        })
        .unwrap();

        assert_eq!(results.len(), 5);
        let seen = seen.into_inner().unwrap();
        let pos = |t: &str| seen.iter().position(|s| s == t).unwrap();
        assert!(pos("0101") < pos("0103"));
        assert!(pos("0102") < pos("0103"));
        assert!(pos("0103") < pos("0104"));
    }

    #[test]
    fn test_run_waves_stops_on_failure() {
        let results = run_waves(ProcessingMode::Sequential, &chain(), |tile| {
            if tile == "0103" {
                Err(Error::Other("boom".into()))
            } else {
                Ok(())
            }
        })
        .unwrap();

        let ran: Vec<&str> = results.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(ran, vec!["0101", "0102", "0201", "0103"]);
        assert!(results[3].1.is_err());
    }

    #[test]
    fn test_from_basins() {
        let basins = BasinCollection::from_json(
            r#"[
                {"id": "010100010001", "to": "010200010001", "polygons": [[[[0,0],[1,0],[1,1],[0,0]]]]},
                {"id": "010100010002", "to": "010100010001", "polygons": [[[[0,0],[1,0],[1,1],[0,0]]]]},
                {"id": "010200010001", "polygons": [[[[0,0],[1,0],[1,1],[0,0]]]]}
            ]"#,
        )
        .unwrap();
        let waves = TileGraph::from_basins(&basins).waves().unwrap();
        assert_eq!(waves, vec![vec!["0101".to_string()], vec!["0102".to_string()]]);
    }
}
