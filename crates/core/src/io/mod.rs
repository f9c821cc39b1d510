//! I/O operations for reading and writing geospatial data

mod native;

pub use native::{
    partial_path, read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer,
};
