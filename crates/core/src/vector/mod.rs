//! Sub-basin polygons carrying hydrologic unit identifiers
//!
//! Basins are read from a JSON array:
//!
//! ```text
//! [{ "id": "020401010101", "to": "020402030405", "polygons": [[[[x, y], ...], ...]] }]
//! ```
//!
//! Each polygon is a list of rings, exterior first, then holes.

use crate::error::{Error, Result};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Number of leading identifier characters naming a regional tile (HUC4)
pub const TILE_ID_LEN: usize = 4;

/// A sub-basin polygon with its own identifier and, when it drains into
/// another basin, the identifier of that basin.
#[derive(Debug, Clone)]
pub struct Basin {
    /// Hydrologic unit code of this basin (e.g. a HUC12)
    pub id: String,
    /// Hydrologic unit code of the basin this one drains into
    pub to: Option<String>,
    /// Basin geometry
    pub polygon: MultiPolygon<f64>,
}

impl Basin {
    pub fn new(id: impl Into<String>, to: Option<String>, polygon: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            to,
            polygon,
        }
    }

    /// Regional tile this basin belongs to
    pub fn tile_id(&self) -> &str {
        tile_prefix(&self.id)
    }

    /// Regional tile this basin drains into, if any
    pub fn downstream_tile_id(&self) -> Option<&str> {
        self.to.as_deref().map(tile_prefix)
    }
}

fn tile_prefix(id: &str) -> &str {
    match id.char_indices().nth(TILE_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BasinRecord {
    id: String,
    #[serde(default)]
    to: Option<String>,
    polygons: Vec<Vec<Vec<[f64; 2]>>>,
}

fn ring(points: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|&[x, y]| Coord { x, y })
            .collect::<Vec<_>>(),
    )
}

impl TryFrom<BasinRecord> for Basin {
    type Error = Error;

    fn try_from(record: BasinRecord) -> Result<Self> {
        let mut polygons = Vec::with_capacity(record.polygons.len());
        for rings in &record.polygons {
            let (exterior, holes) = rings.split_first().ok_or_else(|| Error::InvalidParameter {
                name: "polygons",
                value: record.id.clone(),
                reason: "polygon without an exterior ring".into(),
            })?;
            polygons.push(Polygon::new(ring(exterior), holes.iter().map(|h| ring(h)).collect()));
        }
        Ok(Basin::new(record.id, record.to, MultiPolygon(polygons)))
    }
}

/// Collection of basins
#[derive(Debug, Clone, Default)]
pub struct BasinCollection {
    pub basins: Vec<Basin>,
}

impl BasinCollection {
    pub fn new() -> Self {
        Self { basins: Vec::new() }
    }

    /// Parse a JSON basin document
    pub fn from_json(text: &str) -> Result<Self> {
        let records: Vec<BasinRecord> = serde_json::from_str(text)?;
        let basins = records
            .into_iter()
            .map(Basin::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { basins })
    }

    /// Load basins from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let collection = Self::from_json(&fs::read_to_string(path)?)?;
        debug!("loaded {} basins from {}", collection.len(), path.display());
        Ok(collection)
    }

    pub fn push(&mut self, basin: Basin) {
        self.basins.push(basin);
    }

    pub fn len(&self) -> usize {
        self.basins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Basin> {
        self.basins.iter()
    }

    /// Basins of tile `from_tile` that drain into tile `to_tile`.
    ///
    /// These are the sub-basins sitting on the shared boundary, whose
    /// outlets are candidate pour points between the two tiles.
    pub fn select_pour_basins(&self, from_tile: &str, to_tile: &str) -> Vec<&Basin> {
        let selected: Vec<&Basin> = self
            .basins
            .iter()
            .filter(|b| b.tile_id() == from_tile && b.downstream_tile_id() == Some(to_tile))
            .collect();
        if selected.is_empty() {
            warn!("no basins of {} drain into {}", from_tile, to_tile);
        }
        selected
    }
}

impl IntoIterator for BasinCollection {
    type Item = Basin;
    type IntoIter = std::vec::IntoIter<Basin>;

    fn into_iter(self) -> Self::IntoIter {
        self.basins.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASINS: &str = r#"[
        {"id": "020401010101", "to": "020402030405",
         "polygons": [[[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]]]},
        {"id": "020401010102", "to": "020401010101",
         "polygons": [[[[2, 0], [4, 0], [4, 2], [2, 2], [2, 0]]]]},
        {"id": "020401010103",
         "polygons": [[[[4, 0], [6, 0], [6, 2], [4, 2], [4, 0]],
                       [[4.5, 0.5], [5, 0.5], [5, 1], [4.5, 0.5]]]]}
    ]"#;

    #[test]
    fn test_parse_basins() {
        let basins = BasinCollection::from_json(BASINS).unwrap();
        assert_eq!(basins.len(), 3);
        assert_eq!(basins.basins[0].tile_id(), "0204");
        assert_eq!(basins.basins[2].to, None);
        assert_eq!(basins.basins[2].polygon.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_select_pour_basins() {
        let basins = BasinCollection::from_json(BASINS).unwrap();
        let selected = basins.select_pour_basins("0204", "0204");
        assert_eq!(selected.len(), 2);

        // Only the basin draining across the tile boundary
        let mut cross = basins.clone();
        cross.basins[1].to = Some("0205".into());
        let selected = cross.select_pour_basins("0204", "0205");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "020401010102");

        assert!(basins.select_pour_basins("0204", "0999").is_empty());
    }

    #[test]
    fn test_empty_polygon_rejected() {
        let text = r#"[{"id": "0204", "polygons": [[]]}]"#;
        assert!(BasinCollection::from_json(text).is_err());
    }
}
