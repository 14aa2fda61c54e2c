//! Per-cell raster algebra over aligned grids.
//!
//! One typed function per operation instead of a string-keyed formula
//! dispatch; the alignment invariant is checked at every binary entry
//! point and never repaired here (the pipeline resamples upstream).
//! NaN operands propagate NaN unless an operation states otherwise.

use crate::types::{Raster, RadarError, RadarResult, RasterStats};
use ndarray::Zip;

fn check_aligned(a: &Raster, b: &Raster, op: &str) -> RadarResult<()> {
    if !a.spec.aligned_with(&b.spec) {
        return Err(RadarError::AlignmentMismatch(format!(
            "{}: operand grids differ ({}x{} vs {}x{})",
            op,
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }
    Ok(())
}

fn binary_op<F>(a: &Raster, b: &Raster, op: &str, f: F) -> RadarResult<Raster>
where
    F: Fn(f32, f32) -> f32 + Sync + Send,
{
    check_aligned(a, b, op)?;
    let mut data = a.data.clone();
    Zip::from(&mut data).and(&b.data).for_each(|x, &y| *x = f(*x, y));
    Raster::new(a.spec.clone(), data)
}

/// `|A - B|`
pub fn abs_diff(a: &Raster, b: &Raster) -> RadarResult<Raster> {
    binary_op(a, b, "abs_diff", |x, y| (x - y).abs())
}

/// `A + B`
pub fn add(a: &Raster, b: &Raster) -> RadarResult<Raster> {
    binary_op(a, b, "add", |x, y| x + y)
}

/// `A * B`
pub fn multiply(a: &Raster, b: &Raster) -> RadarResult<Raster> {
    binary_op(a, b, "multiply", |x, y| x * y)
}

/// `A * (1 - B)`
pub fn multiply_one_minus(a: &Raster, b: &Raster) -> RadarResult<Raster> {
    binary_op(a, b, "multiply_one_minus", |x, y| x * (1.0 - y))
}

/// `A / max(B, eps)`, the guarded ratio used for radar precipitation.
/// A nodata divisor stays nodata; the epsilon floor only guards against
/// division by values near zero.
pub fn ratio_clamped(a: &Raster, b: &Raster, eps: f32) -> RadarResult<Raster> {
    binary_op(a, b, "ratio_clamped", move |x, y| {
        if y.is_finite() {
            x / y.max(eps)
        } else {
            f32::NAN
        }
    })
}

/// `A / k`
pub fn div_by_scalar(a: &Raster, k: f64) -> Raster {
    let k = k as f32;
    let mut data = a.data.clone();
    data.mapv_inplace(|v| v / k);
    Raster {
        spec: a.spec.clone(),
        data,
    }
}

/// `max(A, floor)`, flooring valid cells only.
pub fn clamp_min(a: &Raster, floor: f32) -> Raster {
    let mut data = a.data.clone();
    data.mapv_inplace(|v| if v.is_finite() { v.max(floor) } else { v });
    Raster {
        spec: a.spec.clone(),
        data,
    }
}

/// The carried-over min-max rescale `((max/(max+min)) * (A+min)) / max`.
///
/// For any raster with `stats.max > stats.min >= 0` the output lies in
/// [0, 1] for every valid cell. Degenerate stats are guarded upstream:
/// `band_stats` substitutes `{min: 0, max: 1}` for empty or constant
/// rasters, which turns this rescale into the identity.
pub fn min_max_rescale(a: &Raster, stats: &RasterStats) -> Raster {
    let min = stats.min;
    let max = stats.max;
    let gain = max / (max + min);
    let mut data = a.data.clone();
    data.mapv_inplace(|v| ((gain * (v as f64 + min)) / max) as f32);
    Raster {
        spec: a.spec.clone(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stats::band_stats;
    use crate::types::{GeoTransform, GridSpec};
    use ndarray::array;

    fn spec(width: usize, height: usize) -> GridSpec {
        GridSpec::new(
            width,
            height,
            GeoTransform::north_up(0.0, 0.0, 1.0, 1.0),
            "EPSG:4326",
        )
    }

    #[test]
    fn test_mismatched_shapes_fail() {
        let a = Raster::constant(spec(4, 4), 1.0);
        let b = Raster::constant(spec(4, 5), 1.0);
        assert!(matches!(
            add(&a, &b),
            Err(RadarError::AlignmentMismatch(_))
        ));
    }

    #[test]
    fn test_output_shape_matches_input() {
        let a = Raster::constant(spec(7, 3), 2.0);
        let b = Raster::constant(spec(7, 3), 3.0);
        let out = multiply(&a, &b).unwrap();
        assert_eq!(out.spec.shape(), (3, 7));
        assert!(out.data.iter().all(|&v| v == 6.0));
    }

    #[test]
    fn test_nodata_propagates_through_binary_ops() {
        let a = Raster::new(spec(2, 1), array![[1.0_f32, f32::NAN]]).unwrap();
        let b = Raster::constant(spec(2, 1), 5.0);
        let out = abs_diff(&a, &b).unwrap();
        assert_eq!(out.data[[0, 0]], 4.0);
        assert!(out.data[[0, 1]].is_nan());
    }

    #[test]
    fn test_ratio_clamped_guards_small_divisors() {
        let a = Raster::constant(spec(3, 1), 10.0);
        let b = Raster::new(spec(3, 1), array![[0.0_f32, 2.0, f32::NAN]]).unwrap();
        let out = ratio_clamped(&a, &b, 0.001).unwrap();
        assert_eq!(out.data[[0, 0]], 10.0 / 0.001);
        assert_eq!(out.data[[0, 1]], 5.0);
        assert!(out.data[[0, 2]].is_nan());
    }

    #[test]
    fn test_rescale_is_bounded() {
        let data = array![[0.0_f32, 5.0], [10.0, 20.0]];
        let raster = Raster::new(spec(2, 2), data).unwrap();
        let stats = band_stats(&raster);
        assert!(stats.max > stats.min);
        let out = min_max_rescale(&raster, &stats);
        for &v in out.data.iter() {
            assert!((0.0..=1.0).contains(&v), "value {} out of [0,1]", v);
        }
    }

    #[test]
    fn test_weight_complementarity() {
        // w + (1 - w) == 1 exactly, for every defined cell.
        let w = Raster::new(spec(2, 2), array![[0.25_f32, 0.5], [0.75, 1.0]]).unwrap();
        let ones = Raster::constant(spec(2, 2), 1.0);
        let radar_share = multiply(&ones, &w).unwrap();
        let station_share = multiply_one_minus(&ones, &w).unwrap();
        let total = add(&radar_share, &station_share).unwrap();
        assert!(total.data.iter().all(|&v| v == 1.0));
    }
}
