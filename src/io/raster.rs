//! GDAL-backed raster input and output.
//!
//! Every function opens its dataset, finishes with it and lets the handle
//! drop before returning; no GDAL handle outlives the call that created it.

use crate::core::stats::band_stats;
use crate::types::{GeoTransform, GridSpec, Raster, RadarError, RadarResult, RasterStats};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;
use std::path::Path;

/// Open a single-band raster and load band 1 as f32, mapping the file's
/// nodata sentinel to NaN.
pub fn open_raster<P: AsRef<Path>>(path: P) -> RadarResult<Raster> {
    let path = path.as_ref();
    log::debug!("Opening raster: {}", path.display());

    let dataset = Dataset::open(path)?;
    read_band(&dataset, path)
}

/// Open a reflectivity grid. NetCDF products store the grid in a `Band1`
/// subdataset, so a plain open without raster bands falls back to the
/// subdataset syntax.
pub fn open_reflectivity<P: AsRef<Path>>(path: P) -> RadarResult<Raster> {
    let path = path.as_ref();

    if let Ok(dataset) = Dataset::open(path) {
        if dataset.raster_count() > 0 && dataset.raster_size() != (0, 0) {
            return read_band(&dataset, path);
        }
    }

    let subdataset = format!("NETCDF:\"{}\":Band1", path.display());
    log::debug!("Falling back to NetCDF subdataset: {}", subdataset);
    let dataset = Dataset::open(&subdataset)?;
    read_band(&dataset, path)
}

fn read_band(dataset: &Dataset, path: &Path) -> RadarResult<Raster> {
    let (width, height) = dataset.raster_size();
    if width == 0 || height == 0 {
        return Err(RadarError::InvalidInput(format!(
            "raster has zero extent: {}",
            path.display()
        )));
    }

    let geo_transform = dataset.geo_transform()?;
    let projection = dataset.projection();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let mut data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| RadarError::Processing(format!("failed to reshape raster data: {}", e)))?;

    if let Some(sentinel) = nodata {
        let sentinel = sentinel as f32;
        data.mapv_inplace(|v| if v == sentinel { f32::NAN } else { v });
    }

    let mut spec = GridSpec::new(width, height, GeoTransform::from_gdal(geo_transform), &projection);
    spec.nodata = nodata;

    log::debug!(
        "Loaded raster {}: {}x{} cells, nodata {:?}",
        path.display(),
        width,
        height,
        nodata
    );

    Raster::new(spec, data)
}

/// Write a raster as a single-band Float32 GeoTIFF. NaN cells become the
/// given nodata sentinel. Band statistics are computed over valid cells,
/// embedded in the band metadata and returned.
pub fn write_geotiff<P: AsRef<Path>>(
    path: P,
    raster: &Raster,
    nodata: f64,
) -> RadarResult<RasterStats> {
    let path = path.as_ref();
    log::debug!("Writing GeoTIFF: {}", path.display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.data.dim();

    let mut dataset =
        driver.create_with_band_type::<f32, _>(path, width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&raster.spec.transform.to_gdal())?;
    if !raster.spec.projection.is_empty() {
        dataset.set_spatial_ref(&SpatialRef::from_definition(&raster.spec.projection)?)?;
    }

    let stats = band_stats(raster);

    let flat_data: Vec<f32> = raster
        .data
        .iter()
        .map(|&v| if v.is_finite() { v } else { nodata as f32 })
        .collect();
    let buffer = Buffer::new((width, height), flat_data);

    let mut rasterband = dataset.rasterband(1)?;
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(nodata))?;

    rasterband.set_metadata_item("STATISTICS_MINIMUM", &stats.min.to_string(), "")?;
    rasterband.set_metadata_item("STATISTICS_MAXIMUM", &stats.max.to_string(), "")?;
    rasterband.set_metadata_item("STATISTICS_MEAN", &stats.mean.to_string(), "")?;
    rasterband.set_metadata_item("STATISTICS_STDDEV", &stats.stddev.to_string(), "")?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    #[test]
    fn test_geotiff_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.tif");

        let transform = GeoTransform::north_up(-79.0, 0.0, 0.01, 0.01);
        let mut spec = GridSpec::new(3, 2, transform, "");
        spec.nodata = Some(-9999.0);
        let data = array![[1.0_f32, 2.0, f32::NAN], [4.0, 5.0, 6.0]];
        let raster = Raster::new(spec, data).unwrap();

        let stats = write_geotiff(&path, &raster, -9999.0).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 6.0);

        let read_back = open_raster(&path).unwrap();
        assert_eq!(read_back.spec.shape(), (2, 3));
        assert_eq!(read_back.data[[0, 0]], 1.0);
        // The NaN cell was written as the sentinel and read back as NaN.
        assert!(read_back.data[[0, 2]].is_nan());
        assert!(read_back.spec.transform.approx_eq(&raster.spec.transform));
    }
}
