pub mod raster;
pub mod stations;

pub use raster::{open_raster, open_reflectivity, write_geotiff};
pub use stations::read_stations;
