//! Calibration orchestrator: radar reflectivity to precipitation.
//!
//! Sequences the resampler, interpolator, proximity transform, statistics
//! probe and raster algebra into the two-phase calibration algorithm:
//!
//! Phase 1 builds a normalization weight per cell from the elevation
//! difference between the DEM and the interpolated station elevations,
//! plus the distance to the nearest station.
//!
//! Phase 2 interpolates station precipitation, derives a radar/station
//! relation field, converts reflectivity to a radar precipitation estimate
//! and blends the two estimates with the phase-1 weight:
//! `final = radar_estimate * w + station_estimate * (1 - w)`.
//!
//! Every intermediate raster is written as a named GeoTIFF artifact in a
//! run-scoped temporary directory that is removed on every exit path.

use crate::core::algebra;
use crate::core::interpolate::{fill_gaps, SamplePoint, ScatteredInterpolator, MIN_POINTS};
use crate::core::proximity::distance_to_stations;
use crate::core::stats::band_stats;
use crate::core::resample::resample_to_grid;
use crate::io::raster::write_geotiff;
use crate::io::stations::read_stations;
use crate::io::raster::{open_raster, open_reflectivity};
use crate::types::{
    CalibrationState, GridSpec, InterpMethod, Raster, RadarError, RadarResult, RasterStats,
    Station,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Options for one calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    /// Interpolation kernel, selected once and reused for every
    /// interpolation in the run.
    pub method: InterpMethod,
    /// NoData sentinel for the output product.
    pub nodata: f64,
    /// Floor applied to the relation field before division. Carried over
    /// from the source as a fixed contract.
    pub relation_epsilon: f32,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            method: InterpMethod::Linear,
            nodata: -9999.0,
            relation_epsilon: 0.001,
        }
    }
}

/// Progress and warning stream for a calibration run. Implementations must
/// be cheap; callbacks fire at step boundaries only.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8, message: &str);
    fn on_state(&self, _state: CalibrationState) {}
    fn on_warning(&self, message: &str);
}

/// Default sink: forwards everything to the `log` crate.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, percent: u8, message: &str) {
        log::info!("[{:3}%] {}", percent, message);
    }

    fn on_state(&self, state: CalibrationState) {
        log::debug!("state -> {}", state);
    }

    fn on_warning(&self, message: &str) {
        log::warn!("{}", message);
    }
}

/// Cooperative cancellation handle, checked between major steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub output_path: PathBuf,
    pub stats: RasterStats,
    pub stations_total: usize,
    /// Stations that produced a valid radar/precipitation relation.
    pub relation_points: usize,
    pub final_state: CalibrationState,
}

/// The top-level pipeline runner.
pub struct Calibrator {
    options: CalibrationOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelToken,
}

impl Calibrator {
    pub fn new(options: CalibrationOptions) -> Self {
        Self {
            options,
            progress: Arc::new(LogProgress),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Handle for cancelling this run from another thread or from inside
    /// a progress callback.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// File-based entry point: opens the radar grid (GeoTIFF or NetCDF),
    /// the DEM and the station layer, then runs the pipeline.
    pub fn run_files<P: AsRef<Path>>(
        &self,
        radar_path: P,
        dem_path: P,
        stations_path: P,
        elevation_field: &str,
        precipitation_field: &str,
        output_path: P,
    ) -> RadarResult<Option<CalibrationReport>> {
        let radar = open_reflectivity(radar_path.as_ref())?;
        let dem = open_raster(dem_path.as_ref())?;
        let stations = read_stations(
            stations_path.as_ref(),
            elevation_field,
            precipitation_field,
            &radar.spec.projection,
        )?;
        self.run(&radar, &dem, &stations, output_path.as_ref())
    }

    /// Run the calibration. Returns `Ok(None)` when the run was cancelled;
    /// in that case no file exists at `output_path` and all temporaries
    /// are gone.
    pub fn run(
        &self,
        radar: &Raster,
        dem: &Raster,
        stations: &[Station],
        output_path: &Path,
    ) -> RadarResult<Option<CalibrationReport>> {
        let mut state = CalibrationState::Init;
        self.progress.on_state(state);

        // Fail fast before any computation.
        self.validate_inputs(radar, dem, stations)
            .map_err(|e| self.wrap(state, e))?;

        // Run-scoped working directory; Drop removes it on every exit
        // path (success, cancellation or error).
        let workdir = TempDir::new().map_err(|e| self.wrap(state, RadarError::Io(e)))?;
        log::info!("Temporary working directory: {}", workdir.path().display());

        let grid = radar.spec.clone();
        let eps = self.options.relation_epsilon;
        let nodata = self.options.nodata;

        // --- AlignInputs -------------------------------------------------
        state = self.advance(state, CalibrationState::AlignInputs, 5, "Aligning DEM to the radar grid");
        let dem_aligned = self
            .step(state, || resample_to_grid(dem, &grid))
            .and_then(|r| self.persist(state, workdir.path(), "dem_aligned.tif", r, nodata))?;
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        // --- Phase 1: normalization weight -------------------------------
        state = self.advance(
            state,
            CalibrationState::BuildHeightWeight,
            10,
            "Phase 1: building the normalization weight",
        );
        let height_weight = self
            .step(state, || {
                let elev_interp = self.interpolate_station_field(
                    stations.iter().map(|s| (s.x, s.y, Some(s.elevation))),
                    &grid,
                    0.0,
                    "station elevations",
                );
                let elev_interp =
                    self.persist(state, workdir.path(), "station_elevation.tif", elev_interp, nodata)?;

                let height_diff = algebra::abs_diff(&dem_aligned, &elev_interp)?;
                self.progress.on_progress(30, "Computed |DEM - station elevation|");

                let stats = band_stats(&height_diff);
                let max = if stats.max <= 0.0 {
                    self.progress
                        .on_warning("Height difference maximum is not positive; using 1");
                    1.0
                } else {
                    stats.max
                };
                Ok(algebra::div_by_scalar(&height_diff, max))
            })
            .and_then(|r| self.persist(state, workdir.path(), "height_weight.tif", r, nodata))?;
        self.progress.on_progress(40, "Normalized height difference");
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(
            state,
            CalibrationState::BuildProximityWeight,
            50,
            "Computing distance to stations",
        );
        let proximity_weight = self
            .step(state, || {
                let proximity = distance_to_stations(&grid, stations);
                let proximity =
                    self.persist(state, workdir.path(), "proximity.tif", proximity, nodata)?;
                let stats = band_stats(&proximity);
                Ok(algebra::min_max_rescale(&proximity, &stats))
            })
            .and_then(|r| self.persist(state, workdir.path(), "proximity_weight.tif", r, nodata))?;
        self.progress.on_progress(60, "Normalized station proximity");
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(state, CalibrationState::CombineWeights, 65, "Combining weights");
        let combined_weight = self
            .step(state, || {
                let combined = algebra::add(&height_weight, &proximity_weight)?;
                let stats = band_stats(&combined);
                Ok(algebra::min_max_rescale(&combined, &stats))
            })
            .and_then(|r| self.persist(state, workdir.path(), "combined_weight.tif", r, nodata))?;
        self.progress.on_progress(70, "Normalized combined weight");
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        // --- Phase 2: precipitation calibration ---------------------------
        state = self.advance(
            state,
            CalibrationState::InterpolateStationPrecip,
            75,
            "Phase 2: interpolating station precipitation",
        );
        let station_precip = self
            .step(state, || {
                Ok(self.interpolate_station_field(
                    stations.iter().map(|s| (s.x, s.y, s.precipitation)),
                    &grid,
                    0.0,
                    "station precipitation",
                ))
            })
            .and_then(|r| self.persist(state, workdir.path(), "station_precip.tif", r, nodata))?;
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(
            state,
            CalibrationState::ComputeRadarStationRelation,
            80,
            "Sampling radar reflectivity at stations",
        );
        let relations = compute_relations(radar, stations);
        for r in &relations {
            log::debug!("relation at ({:.4}, {:.4}) = {:.4}", r.x, r.y, r.value);
        }

        state = self.advance(
            state,
            CalibrationState::InterpolateRelation,
            85,
            "Interpolating radar/station relations",
        );
        let relation_field = self
            .step(state, || {
                if relations.len() < MIN_POINTS {
                    self.progress.on_warning(&format!(
                        "Only {} stations with a valid relation (minimum {}); using constant 1.0",
                        relations.len(),
                        MIN_POINTS
                    ));
                    return Ok(Raster::constant(grid.clone(), 1.0));
                }
                let interp = ScatteredInterpolator::new(relations.clone())?;
                let field = interp.interpolate(&grid, self.options.method);
                // Holes seeded with the neutral ratio, then floored so the
                // later division can never blow up.
                let field = fill_gaps(&field, 1.0);
                Ok(algebra::clamp_min(&field, eps))
            })
            .and_then(|r| self.persist(state, workdir.path(), "relation.tif", r, nodata))?;
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(
            state,
            CalibrationState::ComputeRadarPrecip,
            90,
            "Converting reflectivity to precipitation",
        );
        let radar_precip = self
            .step(state, || algebra::ratio_clamped(radar, &relation_field, eps))
            .and_then(|r| self.persist(state, workdir.path(), "radar_precip.tif", r, nodata))?;
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(state, CalibrationState::ApplyWeights, 95, "Blending radar and station estimates");
        let final_precip = self.step(state, || {
            let weighted_radar = algebra::multiply(&radar_precip, &combined_weight)?;
            let weighted_station = algebra::multiply_one_minus(&station_precip, &combined_weight)?;
            algebra::add(&weighted_radar, &weighted_station)
        })?;
        if self.cancelled(&mut state) {
            return Ok(None);
        }

        state = self.advance(state, CalibrationState::Finalize, 98, "Writing calibrated precipitation");
        let stats = self.step(state, || {
            let mut out = final_precip;
            out.spec.nodata = Some(nodata);
            write_geotiff(output_path, &out, nodata).map_err(|e| {
                // Never leave a half-written product behind.
                let _ = std::fs::remove_file(output_path);
                e
            })
        })?;

        state = self.advance(state, CalibrationState::Done, 100, "Calibration completed");
        log::info!(
            "Calibrated precipitation written to {} (min {:.3}, max {:.3})",
            output_path.display(),
            stats.min,
            stats.max
        );

        Ok(Some(CalibrationReport {
            output_path: output_path.to_path_buf(),
            stats,
            stations_total: stations.len(),
            relation_points: relations.len(),
            final_state: state,
        }))
    }

    fn validate_inputs(
        &self,
        radar: &Raster,
        dem: &Raster,
        stations: &[Station],
    ) -> RadarResult<()> {
        if radar.width() == 0 || radar.height() == 0 {
            return Err(RadarError::InvalidInput("radar raster has zero extent".into()));
        }
        if radar.spec.projection.is_empty() {
            return Err(RadarError::InvalidInput("radar raster has no CRS".into()));
        }
        if dem.width() == 0 || dem.height() == 0 {
            return Err(RadarError::InvalidInput("DEM raster has zero extent".into()));
        }
        if stations.is_empty() {
            return Err(RadarError::InvalidInput("station set is empty".into()));
        }
        Ok(())
    }

    /// Interpolate one scalar station field onto the grid, falling back to
    /// a constant raster when fewer than three usable points exist. The
    /// fallback is a warning, never a fatal error.
    fn interpolate_station_field<I>(
        &self,
        samples: I,
        grid: &GridSpec,
        fill: f32,
        label: &str,
    ) -> Raster
    where
        I: Iterator<Item = (f64, f64, Option<f64>)>,
    {
        let points: Vec<SamplePoint> = samples
            .filter_map(|(x, y, value)| {
                value
                    .filter(|v| v.is_finite())
                    .map(|value| SamplePoint { x, y, value })
            })
            .collect();

        match ScatteredInterpolator::new(points.clone()) {
            Ok(interp) => {
                let raster = interp.interpolate(grid, self.options.method);
                fill_gaps(&raster, fill)
            }
            Err(RadarError::InsufficientData { needed, got }) => {
                let mean = if points.is_empty() {
                    fill as f64
                } else {
                    points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
                };
                self.progress.on_warning(&format!(
                    "Not enough points to interpolate {} ({} of {}); using constant {:.3}",
                    label, got, needed, mean
                ));
                Raster::constant(grid.clone(), mean as f32)
            }
            // ScatteredInterpolator::new only fails with InsufficientData.
            Err(_) => unreachable!("unexpected interpolator construction failure"),
        }
    }

    /// Write an intermediate raster as a named artifact in the working
    /// directory, returning the raster for further use.
    fn persist(
        &self,
        state: CalibrationState,
        workdir: &Path,
        name: &str,
        raster: Raster,
        nodata: f64,
    ) -> RadarResult<Raster> {
        let path = workdir.join(name);
        self.step(state, || write_geotiff(&path, &raster, nodata))?;
        log::debug!("Artifact written: {}", path.display());
        Ok(raster)
    }

    fn advance(
        &self,
        from: CalibrationState,
        to: CalibrationState,
        percent: u8,
        message: &str,
    ) -> CalibrationState {
        log::debug!("state {} -> {}", from, to);
        self.progress.on_state(to);
        self.progress.on_progress(percent, message);
        to
    }

    /// Cooperative cancellation check at a step boundary. Transitions to
    /// `Aborted`; the temp dir is removed by Drop and no output exists.
    fn cancelled(&self, state: &mut CalibrationState) -> bool {
        if self.cancel.is_cancelled() {
            let from = *state;
            *state = CalibrationState::Aborted;
            self.progress.on_state(CalibrationState::Aborted);
            self.progress
                .on_warning(&format!("Run cancelled after {}; no output produced", from));
            true
        } else {
            false
        }
    }

    fn step<T>(
        &self,
        state: CalibrationState,
        f: impl FnOnce() -> RadarResult<T>,
    ) -> RadarResult<T> {
        f().map_err(|e| self.wrap(state, e))
    }

    fn wrap(&self, state: CalibrationState, error: RadarError) -> RadarError {
        match error {
            already @ RadarError::Pipeline { .. } => already,
            other => {
                log::error!("step {} failed: {}", state, other);
                RadarError::Pipeline {
                    step: state.name(),
                    source: Box::new(other),
                }
            }
        }
    }
}

/// Radar/station relation samples: reflectivity sampled at each station
/// cell divided by the station's precipitation. Stations outside the grid,
/// with nodata reflectivity or with non-positive precipitation are
/// excluded (the ratio is undefined for them).
pub fn compute_relations(radar: &Raster, stations: &[Station]) -> Vec<SamplePoint> {
    stations
        .iter()
        .filter_map(|s| {
            let precip = s.precipitation.filter(|&p| p > 0.0)?;
            let radar_value = radar.sample(s.x, s.y)?;
            if !radar_value.is_finite() {
                return None;
            }
            Some(SamplePoint {
                x: s.x,
                y: s.y,
                value: radar_value as f64 / precip,
            })
        })
        .collect()
}
