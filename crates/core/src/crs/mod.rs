//! Coordinate Reference System handling

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG codes written as geographic (lat/lon) rather than projected CRS.
const GEOGRAPHIC_EPSG: [u32; 4] = [4326, 4269, 4267, 4258];

/// Coordinate Reference System identity.
///
/// The pipeline never reprojects; a CRS is only carried through I/O and
/// compared when checking that rasters are aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// NAD83 / Conus Albers (EPSG:5070), the projection of the NHDPlus HR grids
    pub fn conus_albers() -> Self {
        Self::from_epsg(5070)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether the EPSG code denotes a geographic (angular) CRS
    pub fn is_geographic(&self) -> bool {
        self.epsg.is_some_and(|code| GEOGRAPHIC_EPSG.contains(&code))
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        // WKT comparison ignores whitespace differences only
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            let strip = |s: &str| s.split_whitespace().collect::<String>();
            return strip(a) == strip(b);
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let head: String = wkt.chars().take(50).collect();
            return format!("WKT:{}", head);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}
