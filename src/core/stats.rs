//! Band statistics over valid raster cells.

use crate::types::{Raster, RasterStats};

/// Compute min/max/mean/stddev over finite cells.
///
/// An all-nodata or constant raster returns the safe fallback
/// `{min: 0, max: 1, mean: 0, stddev: 0}` instead of failing, so the
/// normalization formulas downstream never divide by zero. The fallback is
/// logged as a warning.
pub fn band_stats(raster: &Raster) -> RasterStats {
    let mut count: usize = 0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0_f64;
    let mut sum_sq = 0.0_f64;

    for &v in raster.data.iter() {
        if !v.is_finite() {
            continue;
        }
        let v = v as f64;
        count += 1;
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sum_sq += v * v;
    }

    if count == 0 {
        log::warn!("Degenerate statistics: raster has no valid cells, using fallback");
        return RasterStats::degenerate_fallback();
    }
    if min == max {
        log::warn!(
            "Degenerate statistics: raster is constant at {}, using fallback",
            min
        );
        return RasterStats::degenerate_fallback();
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);

    RasterStats {
        min,
        max,
        mean,
        stddev: variance.sqrt(),
    }
}
