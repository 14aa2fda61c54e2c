//! Ground-station point-layer reading.
//!
//! Stations are reprojected into the radar CRS exactly once, here; every
//! downstream consumer works in radar coordinates.

use crate::types::{RadarError, RadarResult, Station};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use std::path::Path;

/// Read station features from a vector layer, taking elevation and
/// precipitation from the named numeric fields. When the layer CRS differs
/// from `target_projection` (radar CRS, WKT or any user definition GDAL
/// accepts), coordinates are transformed up front.
pub fn read_stations<P: AsRef<Path>>(
    path: P,
    elevation_field: &str,
    precipitation_field: &str,
    target_projection: &str,
) -> RadarResult<Vec<Station>> {
    let path = path.as_ref();
    log::info!("Reading stations from: {}", path.display());

    let dataset = Dataset::open(path)?;
    let mut layer = dataset
        .layer(0)
        .map_err(|_| RadarError::InvalidInput(format!("no vector layer in {}", path.display())))?;

    let transform = build_transform(layer.spatial_ref(), target_projection)?;

    let mut stations = Vec::new();
    for feature in layer.features() {
        let geometry = match feature.geometry() {
            Some(g) => g,
            None => continue,
        };
        let (mut x, mut y, _) = geometry.get_point(0);

        if let Some(ref ct) = transform {
            let mut xs = [x];
            let mut ys = [y];
            let mut zs = [0.0];
            ct.transform_coords(&mut xs, &mut ys, &mut zs)?;
            x = xs[0];
            y = ys[0];
        }

        let elevation = feature
            .field_as_double_by_name(elevation_field)?
            .ok_or_else(|| {
                RadarError::InvalidInput(format!("missing elevation field '{}'", elevation_field))
            })?;
        let precipitation = feature.field_as_double_by_name(precipitation_field)?;

        stations.push(Station {
            x,
            y,
            elevation,
            precipitation,
        });
    }

    if stations.is_empty() {
        return Err(RadarError::InvalidInput(format!(
            "station layer {} contains no point features",
            path.display()
        )));
    }

    log::info!("Read {} stations", stations.len());
    Ok(stations)
}

fn build_transform(
    source: Option<SpatialRef>,
    target_projection: &str,
) -> RadarResult<Option<CoordTransform>> {
    let source = match source {
        Some(s) => s,
        None => return Ok(None),
    };
    if target_projection.is_empty() {
        return Ok(None);
    }

    let target = SpatialRef::from_definition(target_projection)?;
    // Same CRS: skip the transform so coordinates stay bit-identical.
    if source.to_wkt().ok() == target.to_wkt().ok() {
        return Ok(None);
    }

    log::info!("Reprojecting stations into the radar CRS");
    Ok(Some(CoordTransform::new(&source, &target)?))
}
