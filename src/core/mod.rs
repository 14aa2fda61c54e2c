//! Core calibration pipeline modules

pub mod algebra;
pub mod calibration;
pub mod interpolate;
pub mod proximity;
pub mod resample;
pub mod stats;
pub mod timeseries;

// Re-export main types
pub use calibration::{
    CalibrationOptions, CalibrationReport, Calibrator, CancelToken, LogProgress, ProgressSink,
};
pub use interpolate::{fill_gaps, SamplePoint, ScatteredInterpolator};
pub use proximity::distance_to_stations;
pub use resample::resample_to_grid;
pub use stats::band_stats;
pub use timeseries::{aggregate_directory, AggregationOptions};
