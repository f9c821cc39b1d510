//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate. A raster round-trips its sample type, no-data
//! value (GDAL_NODATA tag), geotransform (ModelPixelScale + ModelTiepoint)
//! and CRS (GeoKey directory, EPSG code or WKT citation).

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{DataType, GeoTransform, Raster, RasterElement};
use num_traits::NumCast;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::debug;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GT_CITATION: u16 = 1026;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Read a GeoTIFF file into a Raster
///
/// Cell values are cast to `T`; values that do not fit become `T`'s
/// default no-data.
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    debug!("reading {}", path.display());
    let file = File::open(path)?;
    decode_geotiff(file)
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Other(format!("{}: {}", context, e))
}

fn cast_all<S: Copy + NumCast, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

/// Internal: decode a GeoTIFF from any `Read + Seek` source
fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: std::io::Read + Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;

    let rows = height as usize;
    let cols = width as usize;

    let result = decoder
        .read_image()
        .map_err(tiff_err("Cannot read image data"))?;

    let data: Vec<T> = match result {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    if data.len() != rows * cols {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_nodata(read_nodata(&mut decoder));
    raster.set_crs(read_crs(&mut decoder));

    Ok(raster)
}

/// GeoTransform from ModelPixelScale + ModelTiepoint, if both are present
fn read_geotransform<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_nodata<T: RasterElement, R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<T> {
    let text = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA)).ok()?;
    let value: f64 = text.trim_matches(char::from(0)).trim().parse().ok()?;
    T::from_f64(value)
}

fn read_crs<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY)).ok()?;
    if keys.len() < 4 {
        return None;
    }

    let mut citation = None;
    for entry in keys[4..].chunks_exact(4) {
        let (key, location, count, offset) = (entry[0], entry[1], entry[2], entry[3]);
        match key {
            GEOGRAPHIC_TYPE | PROJECTED_CS_TYPE if location == 0 && offset != 0 && offset != 32767 => {
                return Some(CRS::from_epsg(offset as u32));
            }
            GT_CITATION if location == GEO_ASCII_PARAMS => {
                citation = Some((offset as usize, count as usize));
            }
            _ => {}
        }
    }

    let (offset, count) = citation?;
    let ascii = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(GEO_ASCII_PARAMS)).ok()?;
    let wkt: String = ascii.chars().skip(offset).take(count).collect();
    let wkt = wkt.trim_end_matches(['|', '\0']).trim();
    let looks_like_wkt = ["PROJCS", "GEOGCS", "PROJCRS", "GEOGCRS", "COMPD_CS"]
        .iter()
        .any(|head| wkt.starts_with(head));
    looks_like_wkt.then(|| CRS::from_wkt(wkt))
}

/// Temporary path a raster is written to before being renamed into place
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Write a Raster to a GeoTIFF file
///
/// Data goes to `<path>.partial` first and is renamed over `path` only once
/// the encoder has finished, so a failed write never leaves a truncated
/// raster behind.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let tmp = partial_path(path);

    let written = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        encode_geotiff(raster, &mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, path)?;
    debug!("wrote {} ({})", path.display(), T::DATA_TYPE.name());
    Ok(())
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))?;
    Ok(buf)
}

/// Internal: encode a Raster as GeoTIFF into any `Write + Seek` sink
fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;

    match T::DATA_TYPE {
        DataType::U8 => encode_band::<colortype::Gray8, _, _>(&mut encoder, raster),
        DataType::U16 => encode_band::<colortype::Gray16, _, _>(&mut encoder, raster),
        DataType::U32 => encode_band::<colortype::Gray32, _, _>(&mut encoder, raster),
        DataType::I8 => encode_band::<colortype::GrayI8, _, _>(&mut encoder, raster),
        DataType::I16 => encode_band::<colortype::GrayI16, _, _>(&mut encoder, raster),
        DataType::I32 => encode_band::<colortype::GrayI32, _, _>(&mut encoder, raster),
        DataType::F32 => encode_band::<colortype::Gray32Float, _, _>(&mut encoder, raster),
        DataType::F64 => encode_band::<colortype::Gray64Float, _, _>(&mut encoder, raster),
    }
}

fn encode_band<C, T, W>(encoder: &mut TiffEncoder<W>, raster: &Raster<T>) -> Result<()>
where
    C: ColorType,
    C::Inner: NumCast,
    [C::Inner]: TiffValue,
    T: RasterElement,
    W: Write + Seek,
{
    let (rows, cols) = raster.shape();

    let data: Vec<C::Inner> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v))
        .collect::<Option<_>>()
        .ok_or_else(|| Error::UnsupportedDataType(T::DATA_TYPE.name().to_string()))?;

    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;

    let (geokeys, ascii) = geokey_directory(raster.crs());
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(tiff_err("Cannot write geokey tag"))?;
    if let Some(ascii) = ascii {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GEO_ASCII_PARAMS), ascii.as_str())
            .map_err(tiff_err("Cannot write geo ascii tag"))?;
    }

    if let Some(nodata) = raster.nodata().and_then(|v| v.to_f64()) {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            nodata.to_string()
        };
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), text.as_str())
            .map_err(tiff_err("Cannot write nodata tag"))?;
    }

    image
        .write_data(&data)
        .map_err(tiff_err("Cannot write image data"))?;

    Ok(())
}

/// GeoKey directory entries plus the GeoAsciiParams string they reference
fn geokey_directory(crs: Option<&CRS>) -> (Vec<u16>, Option<String>) {
    let geographic = crs.is_some_and(|c| c.is_geographic());
    let mut entries: Vec<[u16; 4]> = vec![
        [GT_MODEL_TYPE, 0, 1, if geographic { 2 } else { 1 }],
        [GT_RASTER_TYPE, 0, 1, 1], // RasterPixelIsArea
    ];
    let mut ascii = None;

    if let Some(crs) = crs {
        if let Some(wkt) = crs.wkt() {
            let text = format!("{}|", wkt);
            entries.push([GT_CITATION, GEO_ASCII_PARAMS, text.len() as u16, 0]);
            ascii = Some(text);
        }
        if let Some(code) = crs.epsg().and_then(|c| u16::try_from(c).ok()) {
            let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
            entries.push([key, 0, 1, code]);
        }
    }

    // Keys must be sorted by id
    entries.sort_by_key(|e| e[0]);
    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    (keys, ascii)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample<T: RasterElement>(values: Vec<T>, nodata: Option<T>) -> Raster<T> {
        let mut r = Raster::from_vec(values, 2, 3).unwrap();
        r.set_transform(GeoTransform::new(-2_000_000.0, 2_500_000.0, 30.0, -30.0));
        r.set_crs(Some(CRS::conus_albers()));
        r.set_nodata(nodata);
        r
    }

    #[test]
    fn test_roundtrip_f32_metadata() {
        let raster = sample(vec![1.0f32, 2.5, -9999.0, 4.0, 5.0, 6.0], Some(-9999.0));
        let dir = tempdir().unwrap();
        let path = dir.path().join("fcpg.tif");

        write_geotiff(&raster, &path).unwrap();
        assert!(!partial_path(&path).exists());

        let back: Raster<f32> = read_geotiff(&path).unwrap();
        assert_eq!(back.shape(), (2, 3));
        assert_eq!(back.nodata(), Some(-9999.0));
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(5070));
        assert!(raster.check_aligned(&back).is_ok());
        assert_eq!(back.get(0, 1).unwrap(), 2.5);
    }

    #[test]
    fn test_roundtrip_int_types() {
        let fdr = sample(vec![1u8, 2, 4, 8, 16, 255], Some(255));
        let bytes = write_geotiff_to_buffer(&fdr).unwrap();
        let back: Raster<u8> = read_geotiff_from_buffer(&bytes).unwrap();
        assert_eq!(back.data(), fdr.data());
        assert_eq!(back.nodata(), Some(255));

        let corr = sample(vec![-1i8, 0, 1, 0, -1, 1], Some(-1));
        let bytes = write_geotiff_to_buffer(&corr).unwrap();
        let back: Raster<i8> = read_geotiff_from_buffer(&bytes).unwrap();
        assert_eq!(back.data(), corr.data());
        assert_eq!(back.nodata(), Some(-1));
    }

    #[test]
    fn test_nan_nodata_and_wkt() {
        let mut raster = sample(vec![f64::NAN, 1.0, 2.0, 3.0, 4.0, 5.0], Some(f64::NAN));
        let wkt = "PROJCS[\"NAD83 / Conus Albers\",UNIT[\"metre\",1]]";
        raster.set_crs(Some(CRS::from_wkt(wkt)));

        let bytes = write_geotiff_to_buffer(&raster).unwrap();
        let back: Raster<f64> = read_geotiff_from_buffer(&bytes).unwrap();
        assert!(back.nodata().is_some_and(|v| v.is_nan()));
        assert_eq!(back.crs().and_then(|c| c.wkt()), Some(wkt));
        assert_eq!(back.count_nodata(), 1);
    }

    #[test]
    fn test_missing_input() {
        let dir = tempdir().unwrap();
        let err = read_geotiff::<f32, _>(dir.path().join("absent.tif")).unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
