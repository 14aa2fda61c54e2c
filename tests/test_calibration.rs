use ndarray::Array2;
use radarcal::core::{CalibrationOptions, Calibrator, CancelToken, ProgressSink};
use radarcal::types::{GeoTransform, GridSpec, InterpMethod, Raster, RadarError, Station};
use std::sync::Arc;

/// 100x100 grid at 0.01 degree resolution, upper-left corner at (-79, 0).
fn radar_spec() -> GridSpec {
    GridSpec::new(
        100,
        100,
        GeoTransform::north_up(-79.0, 0.0, 0.01, 0.01),
        "EPSG:4326",
    )
}

fn radar_raster() -> Raster {
    // Non-negative synthetic reflectivity field with spatial structure.
    let data = Array2::from_shape_fn((100, 100), |(r, c)| 10.0 + ((r + 2 * c) % 40) as f32);
    Raster::new(radar_spec(), data).unwrap()
}

fn dem_raster() -> Raster {
    // Elevation ramp from 1000 to ~1500 m across the grid.
    let data = Array2::from_shape_fn((100, 100), |(r, c)| 1000.0 + 2.5 * (r + c) as f32);
    Raster::new(radar_spec(), data).unwrap()
}

fn station(x: f64, y: f64, elevation: f64, precipitation: f64) -> Station {
    Station {
        x,
        y,
        elevation,
        precipitation: Some(precipitation),
    }
}

fn five_stations() -> Vec<Station> {
    vec![
        station(-78.9, -0.1, 1050.0, 4.0),
        station(-78.2, -0.15, 1420.0, 9.5),
        station(-78.5, -0.5, 1210.0, 6.2),
        station(-78.85, -0.8, 1105.0, 2.4),
        station(-78.15, -0.9, 1485.0, 12.0),
    ]
}

#[test]
fn test_end_to_end_five_stations_linear() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("temp dir");
    let output = dir.path().join("calibrated.tif");

    let calibrator = Calibrator::new(CalibrationOptions {
        method: InterpMethod::Linear,
        ..Default::default()
    });
    let report = calibrator
        .run(&radar_raster(), &dem_raster(), &five_stations(), &output)
        .expect("calibration run")
        .expect("run not cancelled");

    assert_eq!(report.stations_total, 5);
    assert_eq!(report.relation_points, 5);
    assert!(report.stats.min >= 0.0, "min {} negative", report.stats.min);

    let product = radarcal::io::open_raster(&output).expect("read output");
    assert_eq!(product.spec.shape(), (100, 100));
    assert!(
        product.data.iter().all(|v| v.is_finite()),
        "output contains nodata cells"
    );
    assert!(product.data.iter().all(|&v| v >= 0.0));
}

#[test]
fn test_end_to_end_two_stations_degenerates_to_unit_relation() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("temp dir");
    let output = dir.path().join("calibrated.tif");

    // Two stations: every interpolation falls back to a constant field and
    // the relation degenerates to 1.0, so the radar estimate is the raw
    // reflectivity and the station estimate is the constant mean.
    let stations = vec![
        station(-78.7, -0.3, 1100.0, 4.0),
        station(-78.3, -0.7, 1300.0, 8.0),
    ];
    let radar = radar_raster();

    let calibrator = Calibrator::new(CalibrationOptions::default());
    let report = calibrator
        .run(&radar, &dem_raster(), &stations, &output)
        .expect("calibration run")
        .expect("run not cancelled");

    assert_eq!(report.relation_points, 2);

    let product = radarcal::io::open_raster(&output).expect("read output");
    assert!(product.data.iter().all(|v| v.is_finite()));

    // final = radar * w + 6.0 * (1 - w) with w in [0, 1], so every cell
    // lies between the reflectivity value and the mean precipitation.
    let station_mean = 6.0_f32;
    for ((r, c), &v) in product.data.indexed_iter() {
        let radar_v = radar.data[[r, c]];
        let lo = radar_v.min(station_mean) - 1e-3;
        let hi = radar_v.max(station_mean) + 1e-3;
        assert!(
            v >= lo && v <= hi,
            "cell ({}, {}): {} outside [{}, {}]",
            r,
            c,
            v,
            lo,
            hi
        );
    }
}

struct CancelAtPercent {
    percent: u8,
    token: CancelToken,
}

impl ProgressSink for CancelAtPercent {
    fn on_progress(&self, percent: u8, message: &str) {
        println!("[{:3}%] {}", percent, message);
        if percent >= self.percent {
            self.token.cancel();
        }
    }

    fn on_warning(&self, message: &str) {
        println!("warning: {}", message);
    }
}

#[test]
fn test_cancellation_after_height_weight_produces_no_output() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("temp dir");
    let output = dir.path().join("calibrated.tif");

    let calibrator = Calibrator::new(CalibrationOptions::default());
    let token = calibrator.cancel_token();
    // Cancel as soon as the height weight has been normalized (40%).
    let calibrator = calibrator.with_progress(Arc::new(CancelAtPercent { percent: 40, token }));

    let result = calibrator
        .run(&radar_raster(), &dem_raster(), &five_stations(), &output)
        .expect("cancelled run is not an error");

    assert!(result.is_none(), "cancelled run must report no output");
    assert!(!output.exists(), "no file may exist at the target path");
}

#[test]
fn test_radar_without_crs_fails_fast() {
    let mut radar = radar_raster();
    radar.spec.projection = String::new();

    let dir = tempfile::tempdir().expect("temp dir");
    let output = dir.path().join("calibrated.tif");

    let calibrator = Calibrator::new(CalibrationOptions::default());
    let err = calibrator
        .run(&radar, &dem_raster(), &five_stations(), &output)
        .expect_err("missing CRS must fail");
    assert!(matches!(err, RadarError::Pipeline { step: "Init", .. }));
    assert!(!output.exists());
}

#[test]
fn test_misaligned_dem_is_resampled() {
    let _ = env_logger::builder().is_test(true).try_init();

    // DEM over the same area but coarser: 50x50 at 0.02 degrees.
    let dem_spec = GridSpec::new(
        50,
        50,
        GeoTransform::north_up(-79.0, 0.0, 0.02, 0.02),
        "EPSG:4326",
    );
    let dem_data = Array2::from_shape_fn((50, 50), |(r, c)| 1000.0 + 5.0 * (r + c) as f32);
    let dem = Raster::new(dem_spec, dem_data).unwrap();

    let dir = tempfile::tempdir().expect("temp dir");
    let output = dir.path().join("calibrated.tif");

    let calibrator = Calibrator::new(CalibrationOptions::default());
    let report = calibrator
        .run(&radar_raster(), &dem, &five_stations(), &output)
        .expect("calibration run")
        .expect("run not cancelled");

    let product = radarcal::io::open_raster(&report.output_path).expect("read output");
    assert_eq!(product.spec.shape(), (100, 100));
    assert!(product.data.iter().all(|v| v.is_finite()));
}
