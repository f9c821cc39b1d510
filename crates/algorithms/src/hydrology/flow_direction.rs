//! D8 flow direction encodings
//!
//! The canonical encoding is TauDEM's:
//! ```text
//!   4  3  2
//!   5  .  1
//!   6  7  8
//! ```
//! with 0 marking cells outside the modeled basin. ESRI grids use
//! powers of two (E=1, SE=2, S=4, SW=8, W=16, NW=32, N=64, NE=128)
//! with 255 outside the basin; they are converted on the way in.

use crate::maybe_rayon::*;
use fcpg_core::raster::Raster;
use fcpg_core::{Algorithm, Error, Result};
use std::f64::consts::FRAC_PI_4;
use tracing::{info, warn};

/// D8 neighbor offsets: (row_offset, col_offset)
/// Indexed to match the direction encoding (1=E, 2=NE, ..., 8=SE)
pub const D8_OFFSETS: [(isize, isize); 8] = [
    (0, 1),   // 1: E
    (-1, 1),  // 2: NE
    (-1, 0),  // 3: N
    (-1, -1), // 4: NW
    (0, -1),  // 5: W
    (1, -1),  // 6: SW
    (1, 0),   // 7: S
    (1, 1),   // 8: SE
];

/// Distance factors for each D8 direction
pub const D8_DIST: [f64; 8] = [
    1.0, std::f64::consts::SQRT_2, 1.0, std::f64::consts::SQRT_2,
    1.0, std::f64::consts::SQRT_2, 1.0, std::f64::consts::SQRT_2,
];

/// ESRI codes in TauDEM order (E, NE, N, NW, W, SW, S, SE)
const ESRI_CODES: [u8; 8] = [1, 128, 64, 32, 16, 8, 4, 2];

/// Outside-basin code of a TauDEM D8 grid
pub const TAUDEM_NODATA: u8 = 0;
/// Outside-basin code of an ESRI D8 grid
pub const ESRI_NODATA: u8 = 255;

/// D8 flow direction encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum D8Format {
    /// 1..=8 counter-clockwise from east, 0 outside
    TauDem,
    /// Powers of two clockwise from east, 255 outside
    Esri,
}

impl D8Format {
    pub fn nodata(&self) -> u8 {
        match self {
            D8Format::TauDem => TAUDEM_NODATA,
            D8Format::Esri => ESRI_NODATA,
        }
    }

    /// Direction index 0..8 (E, NE, ..., SE) of a code, `None` if the code
    /// is not a flow direction in this format
    pub fn direction_index(&self, code: u8) -> Option<usize> {
        match self {
            D8Format::TauDem => (1..=8).contains(&code).then(|| (code - 1) as usize),
            D8Format::Esri => ESRI_CODES.iter().position(|&c| c == code),
        }
    }

    /// Code of direction index 0..8 in this format
    pub fn code(&self, index: usize) -> u8 {
        match self {
            D8Format::TauDem => index as u8 + 1,
            D8Format::Esri => ESRI_CODES[index],
        }
    }
}

impl std::str::FromStr for D8Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "taudem" => Ok(D8Format::TauDem),
            "esri" => Ok(D8Format::Esri),
            other => Err(Error::InvalidParameter {
                name: "format",
                value: other.to_string(),
                reason: "expected taudem or esri".into(),
            }),
        }
    }
}

/// Whether a TauDEM D8 cell lies inside the basin
#[inline]
pub fn is_inside(code: u8, nodata: Option<u8>) -> bool {
    (1..=8).contains(&code) && nodata != Some(code)
}

/// Cell reached by leaving (row, col) along TauDEM code `code`,
/// or `None` if the code is not a direction or the step leaves the grid
#[inline]
pub fn downstream_cell(row: usize, col: usize, code: u8, rows: usize, cols: usize) -> Option<(usize, usize)> {
    if !(1..=8).contains(&code) {
        return None;
    }
    let (dr, dc) = D8_OFFSETS[(code - 1) as usize];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
        return None;
    }
    Some((nr as usize, nc as usize))
}

/// Map coordinate one cell downstream of (x, y) along TauDEM code `code`.
///
/// Rows grow southward, so a negative row offset moves north (+y).
/// Codes outside 1..=8 leave the point where it is.
pub fn step_downstream(x: f64, y: f64, code: u8, cell_size: f64) -> (f64, f64) {
    if !(1..=8).contains(&code) {
        return (x, y);
    }
    let (dr, dc) = D8_OFFSETS[(code - 1) as usize];
    (x + dc as f64 * cell_size, y - dr as f64 * cell_size)
}

/// D8 format conversion algorithm
#[derive(Debug, Clone, Default)]
pub struct ConvertD8;

/// Parameters for [`ConvertD8`]
#[derive(Debug, Clone, Copy)]
pub struct ConvertD8Params {
    pub from: D8Format,
    pub to: D8Format,
}

impl Default for ConvertD8Params {
    fn default() -> Self {
        Self {
            from: D8Format::Esri,
            to: D8Format::TauDem,
        }
    }
}

impl Algorithm for ConvertD8 {
    type Input = Raster<u8>;
    type Output = Raster<u8>;
    type Params = ConvertD8Params;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Convert D8"
    }

    fn description(&self) -> &'static str {
        "Re-encode a D8 flow direction raster between ESRI and TauDEM codes"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        convert_d8_format(&input, params.from, params.to)
    }
}

/// Re-encode a D8 raster from one format to another.
///
/// The input's own no-data value and any code that is not a direction in
/// `from` become `to`'s outside-basin code. Unexpected codes are counted
/// and reported with a warning.
pub fn convert_d8_format(fdr: &Raster<u8>, from: D8Format, to: D8Format) -> Result<Raster<u8>> {
    let (rows, cols) = fdr.shape();
    let nodata = fdr.nodata();
    info!("converting D8 grid {:?} -> {:?} ({}x{})", from, to, rows, cols);

    let mut unexpected = 0usize;
    let output = fdr.map(Some(to.nodata()), |code| {
        if nodata == Some(code) || code == from.nodata() {
            return to.nodata();
        }
        match from.direction_index(code) {
            Some(idx) => to.code(idx),
            None => to.nodata(),
        }
    });

    for &code in fdr.data().iter() {
        if nodata != Some(code) && code != from.nodata() && from.direction_index(code).is_none() {
            unexpected += 1;
        }
    }
    if unexpected > 0 {
        warn!("{} cells held codes that are not {:?} directions; set to outside basin", unexpected, from);
    }

    Ok(output)
}

/// Convert a TauDEM D8 raster to D-infinity angles.
///
/// Each direction code becomes `(code - 1) * π/4` radians counter-clockwise
/// from east; cells outside the basin become NaN.
pub fn d8_to_dinf(fdr: &Raster<u8>) -> Result<Raster<f64>> {
    let (rows, cols) = fdr.shape();
    let nodata = fdr.nodata();
    info!("converting D8 grid to D-infinity angles ({}x{})", rows, cols);

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| {
                    let code = unsafe { fdr.get_unchecked(row, col) };
                    if is_inside(code, nodata) {
                        (code - 1) as f64 * FRAC_PI_4
                    } else {
                        f64::NAN
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut output = fdr.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = ndarray::Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcpg_core::GeoTransform;

    #[test]
    fn test_esri_to_taudem() {
        let mut esri = Raster::from_vec(vec![1u8, 128, 64, 32, 16, 8, 4, 2, 255, 3], 2, 5).unwrap();
        esri.set_nodata(Some(255));

        let tau = convert_d8_format(&esri, D8Format::Esri, D8Format::TauDem).unwrap();
        let codes: Vec<u8> = tau.data().iter().copied().collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7, 8, 0, 0]);
        assert_eq!(tau.nodata(), Some(0));

        let back = convert_d8_format(&tau, D8Format::TauDem, D8Format::Esri).unwrap();
        assert_eq!(back.get(0, 1).unwrap(), 128);
        assert_eq!(back.get(1, 3).unwrap(), 255);
    }

    #[test]
    fn test_d8_to_dinf() {
        let mut fdr = Raster::from_vec(vec![1u8, 3, 7, 0], 2, 2).unwrap();
        fdr.set_transform(GeoTransform::new(0.0, 2.0, 1.0, -1.0));
        let ang = d8_to_dinf(&fdr).unwrap();

        assert_eq!(ang.get(0, 0).unwrap(), 0.0);
        assert!((ang.get(0, 1).unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((ang.get(1, 0).unwrap() - 3.0 * std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(ang.get(1, 1).unwrap().is_nan());
    }

    #[test]
    fn test_downstream_cell_and_step() {
        assert_eq!(downstream_cell(1, 1, 1, 3, 3), Some((1, 2)));
        assert_eq!(downstream_cell(1, 1, 4, 3, 3), Some((0, 0)));
        assert_eq!(downstream_cell(0, 0, 3, 3, 3), None);
        assert_eq!(downstream_cell(1, 1, 0, 3, 3), None);

        assert_eq!(step_downstream(10.0, 10.0, 2, 5.0), (15.0, 15.0));
        assert_eq!(step_downstream(10.0, 10.0, 7, 5.0), (10.0, 5.0));
        assert_eq!(step_downstream(10.0, 10.0, 6, 5.0), (5.0, 5.0));
    }

    #[test]
    fn test_convert_default_is_esri_to_taudem() {
        let mut esri = Raster::from_vec(vec![64u8, 255], 1, 2).unwrap();
        esri.set_nodata(Some(255));
        let tau = ConvertD8.execute_default(esri).unwrap();
        assert_eq!(tau.get(0, 0).unwrap(), 3);
        assert_eq!(tau.get(0, 1).unwrap(), TAUDEM_NODATA);
    }
}
