//! Temporal aggregation of timestamped reflectivity grids.
//!
//! Scans a directory tree for NetCDF radar products, extracts acquisition
//! times from the filenames, buckets them into fixed-hour intervals and
//! reduces each bucket per cell (sum, mean, max or min). Cells below a
//! reflectivity threshold are treated as invalid for the reduction. One
//! GeoTIFF is written per interval.

use crate::core::calibration::CancelToken;
use crate::io::raster::{open_reflectivity, write_geotiff};
use crate::types::{AggregateOp, Raster, RadarError, RadarResult};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ndarray::Array2;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const NETCDF_EXTENSIONS: [&str; 4] = ["nc", "nc4", "cdf", "netcdf"];

/// Shortest accepted aggregation interval, matching the original tool.
/// Anything shorter would truncate to zero seconds and stall the window
/// loop.
const MIN_INTERVAL_HOURS: f64 = 0.1;

/// Options for one aggregation run. Times are local; `time_offset_hours`
/// converts them to the UTC timestamps embedded in the filenames.
#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub interval_hours: f64,
    pub operation: AggregateOp,
    pub time_offset_hours: i64,
    /// Reflectivity below this (dBZ) is treated as invalid.
    pub threshold: f32,
    /// NoData sentinel for the interval products.
    pub nodata: f64,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            start: NaiveDateTime::MIN,
            end: NaiveDateTime::MAX,
            interval_hours: 24.0,
            operation: AggregateOp::Sum,
            time_offset_hours: 0,
            threshold: 0.0,
            nodata: -9999.0,
        }
    }
}

/// Pull an acquisition timestamp out of a product filename. Supported
/// forms: `...YYYYMMDD_HHMM...` and `...YYYYMMDDHHMM...`.
pub fn extract_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    // The optional underscore covers both layouts with one pattern.
    let re = Regex::new(r"(\d{4})(\d{2})(\d{2})_?(\d{2})(\d{2})").ok()?;
    let caps = re.captures(file_name)?;
    let field = |i: usize| caps.get(i).unwrap().as_str().parse::<u32>().ok();
    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?;
    date.and_hms_opt(field(4)?, field(5)?, 0)
}

/// Reduce a stack of same-shape grids per cell.
///
/// Cells below `threshold` are invalid: sum and mean count them as zero
/// contribution, max and min skip them entirely; cells with no valid
/// sample at all end up as 0 in max/min products.
pub fn reduce_stack(grids: &[Array2<f32>], op: AggregateOp, threshold: f32) -> Array2<f32> {
    assert!(!grids.is_empty(), "reduce_stack needs at least one grid");
    let shape = grids[0].dim();

    match op {
        AggregateOp::Sum => {
            let mut acc = Array2::<f32>::zeros(shape);
            for grid in grids {
                azip_accumulate(&mut acc, grid, threshold, |a, v| *a += v);
            }
            acc
        }
        AggregateOp::Mean => {
            let mut acc = Array2::<f32>::zeros(shape);
            let mut count = Array2::<u32>::zeros(shape);
            for grid in grids {
                ndarray::Zip::from(&mut acc)
                    .and(&mut count)
                    .and(grid)
                    .for_each(|a, n, &v| {
                        if v.is_finite() && v >= threshold {
                            *a += v;
                            *n += 1;
                        }
                    });
            }
            ndarray::Zip::from(&mut acc).and(&count).for_each(|a, &n| {
                *a = if n > 0 { *a / n as f32 } else { 0.0 };
            });
            acc
        }
        AggregateOp::Max => {
            let mut acc = Array2::<f32>::from_elem(shape, f32::NEG_INFINITY);
            for grid in grids {
                azip_accumulate(&mut acc, grid, threshold, |a, v| *a = a.max(v));
            }
            acc.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
            acc
        }
        AggregateOp::Min => {
            let mut acc = Array2::<f32>::from_elem(shape, f32::INFINITY);
            for grid in grids {
                azip_accumulate(&mut acc, grid, threshold, |a, v| *a = a.min(v));
            }
            acc.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
            acc
        }
    }
}

fn azip_accumulate<F>(acc: &mut Array2<f32>, grid: &Array2<f32>, threshold: f32, f: F)
where
    F: Fn(&mut f32, f32),
{
    ndarray::Zip::from(acc).and(grid).for_each(|a, &v| {
        if v.is_finite() && v >= threshold {
            f(a, v);
        }
    });
}

/// Run the aggregation: discover products, bucket them and write one
/// GeoTIFF per non-empty interval. Returns the written paths; an empty
/// run (cancelled or no matching files) returns what was produced so far.
pub fn aggregate_directory(
    input_dir: &Path,
    output_dir: &Path,
    options: &AggregationOptions,
    cancel: &CancelToken,
) -> RadarResult<Vec<PathBuf>> {
    if options.interval_hours < MIN_INTERVAL_HOURS {
        return Err(RadarError::InvalidInput(format!(
            "aggregation interval must be at least {} hours, got {}",
            MIN_INTERVAL_HOURS, options.interval_hours
        )));
    }

    let offset = Duration::hours(options.time_offset_hours);
    let search_start = options.start - offset;
    let search_end = options.end - offset;
    log::info!(
        "Aggregating {} products in {} from {} to {} (UTC), interval {}h",
        options.operation.as_str(),
        input_dir.display(),
        search_start,
        search_end,
        options.interval_hours
    );

    let mut files = discover_products(input_dir, search_start, search_end);
    files.sort_by_key(|(_, time)| *time);
    if files.is_empty() {
        return Err(RadarError::InvalidInput(format!(
            "no NetCDF products with timestamps in range under {}",
            input_dir.display()
        )));
    }
    log::info!("Found {} products in range", files.len());

    std::fs::create_dir_all(output_dir)?;
    let interval = Duration::seconds((options.interval_hours * 3600.0) as i64);

    let mut outputs = Vec::new();
    let mut window_start = search_start;
    while window_start < search_end {
        if cancel.is_cancelled() {
            log::warn!("Aggregation cancelled");
            break;
        }
        let window_end = (window_start + interval).min(search_end);

        let in_window: Vec<&PathBuf> = files
            .iter()
            .filter(|(_, t)| *t >= window_start && *t < window_end)
            .map(|(p, _)| p)
            .collect();

        if !in_window.is_empty() {
            let local_start = window_start + offset;
            let local_end = window_end + offset;
            let name = format!(
                "radar_{}_{}_{}.tif",
                options.operation.as_str(),
                local_start.format("%Y%m%d_%H%M"),
                local_end.format("%Y%m%d_%H%M"),
            );
            log::info!(
                "Interval {} - {} (local): {} products",
                local_start,
                local_end,
                in_window.len()
            );

            match aggregate_window(&in_window, options) {
                Ok(result) => {
                    let path = output_dir.join(&name);
                    write_geotiff(&path, &result, options.nodata)?;
                    outputs.push(path);
                }
                Err(e) => {
                    log::warn!("Skipping interval {}: {}", name, e);
                }
            }
        }

        window_start = window_end;
    }

    if outputs.is_empty() && !cancel.is_cancelled() {
        log::warn!("No interval produced any output");
    }
    Ok(outputs)
}

fn discover_products(
    input_dir: &Path,
    search_start: NaiveDateTime,
    search_end: NaiveDateTime,
) -> Vec<(PathBuf, NaiveDateTime)> {
    WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| NETCDF_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            // Half-open range [start, end), same as the interval windows,
            // so every discovered product lands in exactly one window.
            match extract_timestamp(&name) {
                Some(t) if t >= search_start && t < search_end => {
                    Some((entry.path().to_path_buf(), t))
                }
                Some(_) => None,
                None => {
                    log::debug!("No timestamp in {}, ignoring", name);
                    None
                }
            }
        })
        .collect()
}

/// Load every product of one interval and reduce the stack. Grids whose
/// shape differs from the first one are skipped with a warning.
fn aggregate_window(paths: &[&PathBuf], options: &AggregationOptions) -> RadarResult<Raster> {
    let mut reference: Option<Raster> = None;
    let mut grids = Vec::new();

    for path in paths {
        let raster = match open_reflectivity(path) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        match &reference {
            None => {
                grids.push(raster.data.clone());
                reference = Some(raster);
            }
            Some(first) if first.spec.shape() == raster.spec.shape() => {
                grids.push(raster.data);
            }
            Some(first) => {
                log::warn!(
                    "Shape mismatch in {}: expected {:?}, got {:?}; skipping",
                    path.display(),
                    first.spec.shape(),
                    raster.spec.shape()
                );
            }
        }
    }

    let reference = reference.ok_or_else(|| {
        RadarError::Processing("no readable product in interval".to_string())
    })?;

    let data = reduce_stack(&grids, options.operation, options.threshold);
    let mut spec = reference.spec.clone();
    spec.nodata = Some(options.nodata);
    Raster::new(spec, data)
}
