use chrono::NaiveDate;
use ndarray::Array2;
use radarcal::core::{aggregate_directory, AggregationOptions, CancelToken};
use radarcal::io::{open_raster, write_geotiff};
use radarcal::types::{AggregateOp, GeoTransform, GridSpec, Raster};
use std::path::Path;

fn spec() -> GridSpec {
    GridSpec::new(10, 10, GeoTransform::north_up(-79.0, 0.0, 0.01, 0.01), "EPSG:4326")
}

fn write_product(dir: &Path, name: &str, value: f32) {
    let raster = Raster::constant(spec(), value);
    // GDAL identifies the format from the file content, so a GeoTIFF
    // carrying the product naming convention stands in for NetCDF here.
    write_geotiff(&dir.join(name), &raster, -9999.0).expect("write product");
}

#[test]
fn test_daily_sum_over_two_days() {
    let _ = env_logger::builder().is_test(true).try_init();

    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");

    write_product(input.path(), "radar_20240110_0200.nc", 1.5);
    write_product(input.path(), "radar_20240110_1400.nc", 2.5);
    write_product(input.path(), "radar_20240111_0800.nc", 4.0);
    // Outside the requested range, must be ignored.
    write_product(input.path(), "radar_20240201_0000.nc", 99.0);
    // No timestamp, must be ignored.
    write_product(input.path(), "lookup_table.nc", 50.0);

    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 1, 12).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        interval_hours: 24.0,
        operation: AggregateOp::Sum,
        ..Default::default()
    };
    let outputs = aggregate_directory(input.path(), output.path(), &options, &CancelToken::new())
        .expect("aggregation run");

    assert_eq!(outputs.len(), 2);
    let day1 = outputs
        .iter()
        .find(|p| p.file_name().unwrap() == "radar_sum_20240110_0000_20240111_0000.tif")
        .expect("first interval product");
    let day2 = outputs
        .iter()
        .find(|p| p.file_name().unwrap() == "radar_sum_20240111_0000_20240112_0000.tif")
        .expect("second interval product");

    let day1 = open_raster(day1).expect("read day 1");
    assert_eq!(day1.spec.shape(), (10, 10));
    assert!(day1.data.iter().all(|&v| (v - 4.0).abs() < 1e-5));

    let day2 = open_raster(day2).expect("read day 2");
    assert!(day2.data.iter().all(|&v| (v - 4.0).abs() < 1e-5));
}

#[test]
fn test_offset_shifts_window_and_naming() {
    let _ = env_logger::builder().is_test(true).try_init();

    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");

    // Local time is UTC-5: local 2024-01-10 00:00 corresponds to the
    // product stamped 05:00 UTC.
    write_product(input.path(), "radar_20240110_0500.nc", 3.0);

    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        interval_hours: 24.0,
        operation: AggregateOp::Max,
        time_offset_hours: -5,
        ..Default::default()
    };
    let outputs = aggregate_directory(input.path(), output.path(), &options, &CancelToken::new())
        .expect("aggregation run");

    assert_eq!(outputs.len(), 1);
    assert_eq!(
        outputs[0].file_name().unwrap(),
        "radar_max_20240110_0000_20240111_0000.tif"
    );
    let product = open_raster(&outputs[0]).expect("read product");
    assert!(product.data.iter().all(|&v| (v - 3.0).abs() < 1e-5));
}

#[test]
fn test_shape_mismatch_is_skipped_not_fatal() {
    let _ = env_logger::builder().is_test(true).try_init();

    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");

    write_product(input.path(), "radar_20240110_0200.nc", 2.0);

    // Different grid in the same interval.
    let other_spec = GridSpec::new(4, 4, GeoTransform::north_up(-79.0, 0.0, 0.01, 0.01), "EPSG:4326");
    let other = Raster::constant(other_spec, 100.0);
    write_geotiff(&input.path().join("radar_20240110_0300.nc"), &other, -9999.0)
        .expect("write mismatched product");

    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        operation: AggregateOp::Sum,
        ..Default::default()
    };
    let outputs = aggregate_directory(input.path(), output.path(), &options, &CancelToken::new())
        .expect("aggregation run");

    assert_eq!(outputs.len(), 1);
    let product = open_raster(&outputs[0]).expect("read product");
    assert_eq!(product.spec.shape(), (10, 10));
    assert!(product.data.iter().all(|&v| (v - 2.0).abs() < 1e-5));
}

#[test]
fn test_subminute_interval_is_rejected() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    write_product(input.path(), "radar_20240110_0200.nc", 1.0);

    // An interval this short truncates to zero seconds; it must be
    // rejected up front instead of stalling the window loop.
    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        interval_hours: 0.0001,
        ..Default::default()
    };
    assert!(
        aggregate_directory(input.path(), output.path(), &options, &CancelToken::new()).is_err()
    );
}

#[test]
fn test_range_end_is_exclusive() {
    let _ = env_logger::builder().is_test(true).try_init();

    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");

    write_product(input.path(), "radar_20240110_0200.nc", 1.0);
    // Stamped exactly at the end instant: outside the half-open range,
    // never assigned to any interval.
    write_product(input.path(), "radar_20240111_0000.nc", 50.0);

    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 1, 11).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        operation: AggregateOp::Sum,
        ..Default::default()
    };
    let outputs = aggregate_directory(input.path(), output.path(), &options, &CancelToken::new())
        .expect("aggregation run");

    assert_eq!(outputs.len(), 1);
    let product = open_raster(&outputs[0]).expect("read product");
    assert!(product.data.iter().all(|&v| (v - 1.0).abs() < 1e-5));
}

#[test]
fn test_no_products_in_range_is_an_error() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    write_product(input.path(), "radar_20240110_0200.nc", 1.0);

    let options = AggregationOptions {
        start: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        end: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        ..Default::default()
    };
    assert!(
        aggregate_directory(input.path(), output.path(), &options, &CancelToken::new()).is_err()
    );
}
