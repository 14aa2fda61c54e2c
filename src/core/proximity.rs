//! Distance-to-station proximity grids.
//!
//! Exact Euclidean distance transform (Felzenszwalb & Huttenlocher's
//! two-pass parabola method) from every cell to the nearest cell that
//! contains a station, in pixel units. Feeds the proximity component of
//! the normalization weight.

use crate::types::{GridSpec, Raster, Station};
use ndarray::Array2;

const INF: f64 = 1e20;

/// Distance in pixels from each cell to the nearest station cell.
/// Stations outside the grid extent are ignored; with no station inside
/// the grid the result degenerates to a constant zero raster (the
/// statistics fallback downstream then neutralizes the weight).
pub fn distance_to_stations(spec: &GridSpec, stations: &[Station]) -> Raster {
    let (height, width) = spec.shape();
    let mut sq_dist = Array2::<f64>::from_elem((height, width), INF);

    let mut seeded = 0usize;
    for station in stations {
        let (row, col) = spec.transform.map_to_pixel(station.x, station.y);
        if spec.contains_pixel(row, col) {
            sq_dist[[row as usize, col as usize]] = 0.0;
            seeded += 1;
        }
    }

    if seeded == 0 {
        log::warn!("No station falls inside the grid; proximity degenerates to zero");
        return Raster::constant(spec.clone(), 0.0);
    }
    log::debug!("Proximity transform seeded from {} station cells", seeded);

    // Pass 1: columns.
    let mut scratch_f = vec![0.0_f64; height.max(width)];
    let mut scratch_d = vec![0.0_f64; height.max(width)];
    for col in 0..width {
        for row in 0..height {
            scratch_f[row] = sq_dist[[row, col]];
        }
        dt_1d(&scratch_f[..height], &mut scratch_d[..height]);
        for row in 0..height {
            sq_dist[[row, col]] = scratch_d[row];
        }
    }

    // Pass 2: rows.
    for row in 0..height {
        for col in 0..width {
            scratch_f[col] = sq_dist[[row, col]];
        }
        dt_1d(&scratch_f[..width], &mut scratch_d[..width]);
        for col in 0..width {
            sq_dist[[row, col]] = scratch_d[col];
        }
    }

    let data = sq_dist.mapv(|v| v.sqrt() as f32);
    Raster {
        spec: spec.clone(),
        data,
    }
}

/// 1D squared distance transform under a lower envelope of parabolas.
fn dt_1d(f: &[f64], d: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }

    let mut v = vec![0usize; n];
    let mut z = vec![0.0_f64; n + 1];
    let mut k = 0usize;
    v[0] = 0;
    z[0] = -INF;
    z[1] = INF;

    let intersect = |f: &[f64], p: usize, q: usize| -> f64 {
        ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * (q as f64 - p as f64))
    };

    for q in 1..n {
        let mut s = intersect(f, v[k], q);
        while s <= z[k] {
            k -= 1;
            s = intersect(f, v[k], q);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = INF;
    }

    k = 0;
    for q in 0..n {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dq = q as f64 - v[k] as f64;
        d[q] = dq * dq + f[v[k]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, GridSpec, Station};
    use approx::assert_relative_eq;

    fn spec(width: usize, height: usize) -> GridSpec {
        GridSpec::new(
            width,
            height,
            GeoTransform::north_up(0.0, height as f64, 1.0, 1.0),
            "EPSG:4326",
        )
    }

    fn station_at(x: f64, y: f64) -> Station {
        Station {
            x,
            y,
            elevation: 0.0,
            precipitation: Some(1.0),
        }
    }

    #[test]
    fn test_single_station_distances() {
        // Station in the cell at row 0, col 0 of a 5x5 unit grid.
        let spec = spec(5, 5);
        let out = distance_to_stations(&spec, &[station_at(0.5, 4.5)]);
        assert_eq!(out.data[[0, 0]], 0.0);
        assert_relative_eq!(out.data[[0, 3]], 3.0, epsilon = 1e-6);
        assert_relative_eq!(out.data[[3, 4]], 5.0, epsilon = 1e-6); // 3-4-5 triangle
    }

    #[test]
    fn test_nearest_of_two_stations_wins() {
        let spec = spec(9, 1);
        let out = distance_to_stations(&spec, &[station_at(0.5, 0.5), station_at(8.5, 0.5)]);
        assert_relative_eq!(out.data[[0, 3]], 3.0, epsilon = 1e-6);
        assert_relative_eq!(out.data[[0, 6]], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_no_station_in_grid_is_constant_zero() {
        let spec = spec(4, 4);
        let out = distance_to_stations(&spec, &[station_at(100.0, 100.0)]);
        assert!(out.data.iter().all(|&v| v == 0.0));
    }
}
