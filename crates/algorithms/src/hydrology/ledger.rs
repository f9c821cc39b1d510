//! Update ledger of pour-point values awaiting injection
//!
//! One ledger per downstream tile, keyed by upstream tile id:
//!
//! ```text
//! {
//!     "0204": {
//!         "FDR": [1.0],
//!         "maxUpstreamFAC": [152330.0],
//!         "vars": ["FDR", "maxUpstreamFAC"],
//!         "x": [1712345.0],
//!         "y": [2298765.0]
//!     }
//! }
//! ```
//!
//! Variables are merged, never dropped. Recording the same variable again
//! replaces its values, so re-running a cascade does not double count.

use super::pour_points::PourPoint;
use fcpg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ledger variable holding upstream flow accumulation totals
pub const FAC_VARIABLE: &str = "maxUpstreamFAC";
/// Ledger variable holding the D8 code at each pour point
pub const FDR_VARIABLE: &str = "FDR";

/// Pour points of one upstream tile and the values recorded at them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Explicit outlet location overriding x/y at injection time
    #[serde(rename = "outletX", default, skip_serializing_if = "Option::is_none")]
    pub outlet_x: Option<Vec<f64>>,
    #[serde(rename = "outletY", default, skip_serializing_if = "Option::is_none")]
    pub outlet_y: Option<Vec<f64>>,
    /// Names of the recorded variables, sorted
    #[serde(default)]
    pub vars: Vec<String>,
    /// Recorded variables, one value per pour point
    #[serde(flatten)]
    pub variables: BTreeMap<String, Vec<f64>>,
}

impl LedgerEntry {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Coordinates to inject at: the outlet override if present
    pub fn injection_coords(&self) -> (&[f64], &[f64]) {
        match (&self.outlet_x, &self.outlet_y) {
            (Some(ox), Some(oy)) => (ox, oy),
            _ => (&self.x, &self.y),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&[f64]> {
        self.variables.get(name).map(|v| v.as_slice())
    }

    fn set_variable(&mut self, name: &str, values: Vec<f64>) {
        self.variables.insert(name.to_string(), values);
        if !self.vars.iter().any(|v| v == name) {
            self.vars.push(name.to_string());
        }
        self.vars.sort();
    }

    fn validate(&self, key: &str) -> Result<()> {
        let n = self.x.len();
        if self.y.len() != n {
            return Err(Error::Ledger(format!("{}: {} x vs {} y coordinates", key, n, self.y.len())));
        }
        match (&self.outlet_x, &self.outlet_y) {
            (Some(ox), Some(oy)) if ox.len() != n || oy.len() != n => {
                return Err(Error::Ledger(format!(
                    "{}: {} outletX and {} outletY for {} pour points",
                    key,
                    ox.len(),
                    oy.len(),
                    n
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Ledger(format!("{}: outletX and outletY must be given together", key)));
            }
            _ => {}
        }
        for name in &self.vars {
            match self.variables.get(name) {
                Some(values) if values.len() == n => {}
                Some(values) => {
                    return Err(Error::Ledger(format!(
                        "{}: variable {} has {} values for {} pour points",
                        key,
                        name,
                        values.len(),
                        n
                    )))
                }
                None => return Err(Error::Ledger(format!("{}: listed variable {} is absent", key, name))),
            }
        }
        Ok(())
    }
}

/// Persistent ledger of one downstream tile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl UpdateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a ledger document
    pub fn from_json(text: &str) -> Result<Self> {
        let ledger: Self = serde_json::from_str(text)?;
        for (key, entry) in &ledger.entries {
            entry.validate(key)?;
        }
        Ok(ledger)
    }

    /// Load a ledger file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        debug!("loading ledger {}", path.display());
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Load a ledger file, or start an empty one if it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("ledger {} not found; starting a new one", path.display());
            Ok(Self::new())
        }
    }

    /// Pretty-printed JSON with sorted keys
    pub fn to_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| Error::Ledger(e.to_string()))
    }

    /// Write the ledger atomically: a temporary file in the same directory
    /// is renamed over `path` once fully written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let text = self.to_json()?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        info!("wrote ledger {} ({} upstream tiles)", path.display(), self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, upstream: &str) -> Option<&LedgerEntry> {
        self.entries.get(upstream)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn remove(&mut self, upstream: &str) -> Option<LedgerEntry> {
        self.entries.remove(upstream)
    }

    /// Record the pour points of `upstream` with their accumulated totals
    /// (`maxUpstreamFAC`) and D8 codes (`FDR`).
    ///
    /// Re-recording identical coordinates only refreshes those two
    /// variables. Different coordinates are refused while other variables
    /// are keyed to the old ones.
    pub fn record_pour_points(&mut self, upstream: &str, points: &[PourPoint]) -> Result<()> {
        let x: Vec<f64> = points.iter().map(|p| p.x).collect();
        let y: Vec<f64> = points.iter().map(|p| p.y).collect();
        let fac: Vec<f64> = points.iter().map(|p| p.value).collect();
        let fdr: Vec<f64> = points.iter().map(|p| p.fdr as f64).collect();

        let entry = self.entries.entry(upstream.to_string()).or_default();
        if entry.x != x || entry.y != y {
            let foreign = entry
                .vars
                .iter()
                .any(|v| v != FAC_VARIABLE && v != FDR_VARIABLE);
            if foreign {
                return Err(Error::Ledger(format!(
                    "{}: pour points moved but variables {:?} refer to the old ones",
                    upstream, entry.vars
                )));
            }
            entry.x = x;
            entry.y = y;
            entry.vars.clear();
            entry.variables.clear();
        }
        entry.set_variable(FAC_VARIABLE, fac);
        entry.set_variable(FDR_VARIABLE, fdr);
        debug!("{}: recorded {} pour points", upstream, entry.len());
        Ok(())
    }

    /// Add or replace variable `name` for `upstream`, one value per pour point
    pub fn update(&mut self, upstream: &str, name: &str, values: Vec<f64>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(upstream)
            .ok_or_else(|| Error::Ledger(format!("no pour points recorded for {}", upstream)))?;
        if values.len() != entry.len() {
            return Err(Error::Ledger(format!(
                "{}: {} values for {} pour points",
                upstream,
                values.len(),
                entry.len()
            )));
        }
        entry.set_variable(name, values);
        debug!("{}: updated {}", upstream, name);
        Ok(())
    }

    /// Set an explicit outlet location for `upstream`
    pub fn set_outlet(&mut self, upstream: &str, x: Vec<f64>, y: Vec<f64>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(upstream)
            .ok_or_else(|| Error::Ledger(format!("no pour points recorded for {}", upstream)))?;
        if x.len() != entry.len() || y.len() != entry.len() {
            return Err(Error::Ledger(format!(
                "{}: {} outlet x and {} outlet y for {} pour points",
                upstream,
                x.len(),
                y.len(),
                entry.len()
            )));
        }
        entry.outlet_x = Some(x);
        entry.outlet_y = Some(y);
        Ok(())
    }

    /// Values of `name` for `upstream`. A variable that was never recorded
    /// is reported and yields `None`.
    pub fn get(&self, upstream: &str, name: &str) -> Option<&[f64]> {
        let values = self.entries.get(upstream).and_then(|e| e.variable(name));
        if values.is_none() {
            warn!("ledger has no {} for upstream tile {}", name, upstream);
        }
        values
    }
}
