//! radarcal: weather-radar reflectivity to precipitation calibration
//!
//! This library converts weather-radar reflectivity grids into calibrated
//! precipitation products by fusing the radar image with ground-station
//! observations: station fields are interpolated onto the radar grid, a
//! per-cell normalization weight is built from elevation difference and
//! station proximity, and the radar- and station-derived estimates are
//! blended into one consistent precipitation field. It also aggregates
//! timestamped reflectivity products over fixed time intervals.

use pyo3::prelude::*;

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AggregateOp, CalibrationState, GeoTransform, GridSpec, InterpMethod, Raster, RadarError,
    RadarResult, RasterStats, Station,
};

pub use core::{
    aggregate_directory, band_stats, resample_to_grid, AggregationOptions, CalibrationOptions,
    CalibrationReport, Calibrator, CancelToken, ProgressSink, ScatteredInterpolator,
};

fn to_py_err(e: RadarError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(calibrate_radar, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate_time_series, m)?)?;
    Ok(())
}

/// Run the full calibration pipeline on files. Returns the output path;
/// None means the run was cancelled before producing a product.
#[pyfunction]
#[pyo3(signature = (radar_path, dem_path, stations_path, elevation_field, precipitation_field, output_path, method="linear", nodata=-9999.0))]
#[allow(clippy::too_many_arguments)]
fn calibrate_radar(
    radar_path: String,
    dem_path: String,
    stations_path: String,
    elevation_field: String,
    precipitation_field: String,
    output_path: String,
    method: &str,
    nodata: f64,
) -> PyResult<Option<String>> {
    let options = CalibrationOptions {
        method: method.parse().map_err(to_py_err)?,
        nodata,
        ..Default::default()
    };
    let calibrator = Calibrator::new(options);
    let report = calibrator
        .run_files(
            &radar_path,
            &dem_path,
            &stations_path,
            &elevation_field,
            &precipitation_field,
            &output_path,
        )
        .map_err(to_py_err)?;
    Ok(report.map(|r| r.output_path.display().to_string()))
}

/// Aggregate timestamped NetCDF reflectivity products into interval
/// GeoTIFFs. `start`/`end` are local times formatted `YYYY-MM-DD HH:MM`.
#[pyfunction]
#[pyo3(signature = (input_dir, output_dir, start, end, interval_hours=24.0, operation="sum", time_offset_hours=0, threshold=0.0))]
#[allow(clippy::too_many_arguments)]
fn aggregate_time_series(
    input_dir: String,
    output_dir: String,
    start: &str,
    end: &str,
    interval_hours: f64,
    operation: &str,
    time_offset_hours: i64,
    threshold: f32,
) -> PyResult<Vec<String>> {
    let parse = |s: &str| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").map_err(|e| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "invalid datetime '{}': {}",
                s, e
            ))
        })
    };
    let operation = match operation.to_ascii_lowercase().as_str() {
        "sum" => AggregateOp::Sum,
        "mean" => AggregateOp::Mean,
        "max" => AggregateOp::Max,
        "min" => AggregateOp::Min,
        other => {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "unknown operation: {}",
                other
            )))
        }
    };

    let options = AggregationOptions {
        start: parse(start)?,
        end: parse(end)?,
        interval_hours,
        operation,
        time_offset_hours,
        threshold,
        ..Default::default()
    };
    let outputs = aggregate_directory(
        std::path::Path::new(&input_dir),
        std::path::Path::new(&output_dir),
        &options,
        &CancelToken::new(),
    )
    .map_err(to_py_err)?;
    Ok(outputs.iter().map(|p| p.display().to_string()).collect())
}
