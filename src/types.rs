use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing geotransforms for grid alignment.
const TRANSFORM_EPS: f64 = 1e-9;

/// Affine georeferencing transform (GDAL ordering, rotation terms zero
/// for north-up grids).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform from an origin and cell sizes. `pixel_height`
    /// is stored negative, matching GDAL convention.
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of the center of cell (row, col).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.top_left_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.top_left_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// Cell indices containing the map coordinate, without bounds checking.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.top_left_x) / self.pixel_width).floor() as i64;
        let row = ((y - self.top_left_y) / self.pixel_height).floor() as i64;
        (row, col)
    }

    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let a = self.to_gdal();
        let b = other.to_gdal();
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= TRANSFORM_EPS)
    }
}

/// Target grid description: shape, georeferencing, CRS and nodata sentinel.
///
/// Two grids are "aligned" when shape, transform and CRS all match; every
/// raster-algebra operation requires alignment and the pipeline enforces it
/// by resampling, never by implicit broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    /// CRS as WKT (or empty when the source carried none).
    pub projection: String,
    pub nodata: Option<f64>,
}

impl GridSpec {
    pub fn new(width: usize, height: usize, transform: GeoTransform, projection: &str) -> Self {
        Self {
            width,
            height,
            transform,
            projection: projection.to_string(),
            nodata: None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Extent as (xmin, ymin, xmax, ymax) for a north-up grid.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let gt = &self.transform;
        let xmin = gt.top_left_x;
        let xmax = gt.top_left_x + self.width as f64 * gt.pixel_width;
        let y0 = gt.top_left_y;
        let y1 = gt.top_left_y + self.height as f64 * gt.pixel_height;
        (xmin, y0.min(y1), xmax, y0.max(y1))
    }

    pub fn contains_pixel(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.height && (col as usize) < self.width
    }

    pub fn aligned_with(&self, other: &GridSpec) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.transform.approx_eq(&other.transform)
            && self.projection == other.projection
    }
}

/// In-memory single-band raster. NaN is the working nodata value; the
/// sentinel from `spec.nodata` is substituted on write.
#[derive(Debug, Clone)]
pub struct Raster {
    pub spec: GridSpec,
    pub data: Array2<f32>,
}

impl Raster {
    pub fn new(spec: GridSpec, data: Array2<f32>) -> RadarResult<Self> {
        if data.dim() != spec.shape() {
            return Err(RadarError::AlignmentMismatch(format!(
                "data shape {:?} does not match grid spec {:?}",
                data.dim(),
                spec.shape()
            )));
        }
        Ok(Self { spec, data })
    }

    /// Constant-valued raster over a grid (used for degenerate fallbacks).
    pub fn constant(spec: GridSpec, value: f32) -> Self {
        let data = Array2::from_elem(spec.shape(), value);
        Self { spec, data }
    }

    pub fn width(&self) -> usize {
        self.spec.width
    }

    pub fn height(&self) -> usize {
        self.spec.height
    }

    /// Sample the cell containing a map coordinate, None outside the grid.
    pub fn sample(&self, x: f64, y: f64) -> Option<f32> {
        let (row, col) = self.spec.transform.map_to_pixel(x, y);
        if self.spec.contains_pixel(row, col) {
            Some(self.data[[row as usize, col as usize]])
        } else {
            None
        }
    }
}

/// One ground-station observation, coordinates already in the radar CRS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Station {
    pub x: f64,
    pub y: f64,
    pub elevation: f64,
    /// Precipitation in mm; None when the source field was null.
    pub precipitation: Option<f64>,
}

/// Scattered interpolation kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpMethod {
    Linear,
    Cubic,
    Nearest,
}

impl InterpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpMethod::Linear => "linear",
            InterpMethod::Cubic => "cubic",
            InterpMethod::Nearest => "nearest",
        }
    }
}

impl std::str::FromStr for InterpMethod {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(InterpMethod::Linear),
            "cubic" => Ok(InterpMethod::Cubic),
            "nearest" => Ok(InterpMethod::Nearest),
            other => Err(RadarError::InvalidInput(format!(
                "unknown interpolation method: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for InterpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Band statistics over valid cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

impl RasterStats {
    /// Safe fallback used for empty or constant rasters so downstream
    /// normalization never divides by zero.
    pub fn degenerate_fallback() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            mean: 0.0,
            stddev: 0.0,
        }
    }
}

/// Sequential states of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationState {
    Init,
    AlignInputs,
    BuildHeightWeight,
    BuildProximityWeight,
    CombineWeights,
    InterpolateStationPrecip,
    ComputeRadarStationRelation,
    InterpolateRelation,
    ComputeRadarPrecip,
    ApplyWeights,
    Finalize,
    Done,
    Aborted,
}

impl CalibrationState {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationState::Init => "Init",
            CalibrationState::AlignInputs => "AlignInputs",
            CalibrationState::BuildHeightWeight => "BuildHeightWeight",
            CalibrationState::BuildProximityWeight => "BuildProximityWeight",
            CalibrationState::CombineWeights => "CombineWeights",
            CalibrationState::InterpolateStationPrecip => "InterpolateStationPrecip",
            CalibrationState::ComputeRadarStationRelation => "ComputeRadarStationRelation",
            CalibrationState::InterpolateRelation => "InterpolateRelation",
            CalibrationState::ComputeRadarPrecip => "ComputeRadarPrecip",
            CalibrationState::ApplyWeights => "ApplyWeights",
            CalibrationState::Finalize => "Finalize",
            CalibrationState::Done => "Done",
            CalibrationState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-cell reduction applied to each time-series interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateOp {
    Sum,
    Mean,
    Max,
    Min,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Max => "max",
            AggregateOp::Min => "min",
        }
    }
}

/// Error types for radar calibration processing.
#[derive(Debug, thiserror::Error)]
pub enum RadarError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("raster grids are not aligned: {0}")]
    AlignmentMismatch(String),

    #[error("insufficient station data: need {needed}, have {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("pipeline failed in step {step}: {source}")]
    Pipeline {
        step: &'static str,
        #[source]
        source: Box<RadarError>,
    },
}

/// Result type for radar calibration operations.
pub type RadarResult<T> = Result<T, RadarError>;
