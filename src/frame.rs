//! Input data model for one reduced exposure.
//!
//! Upstream collaborators (detector processing, wavelength calibration, slit
//! tracing) hand this layer three equal-shaped images plus one trace table
//! per detected object. Everything here is borrowed: the extraction engine
//! never copies an image, and traces remain owned by the tracing stage.
//!
//! Axis convention: axis 0 is the dispersion direction (rows), axis 1 is the
//! spatial direction (columns).

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from assembling the per-exposure input bundle.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Science, inverse-variance and wavelength images must share one shape.
    #[error(
        "input image shapes disagree: science {science:?}, ivar {ivar:?}, wavelength {wave:?}"
    )]
    ShapeMismatch {
        /// Shape of the science image.
        science: (usize, usize),
        /// Shape of the inverse-variance image.
        ivar: (usize, usize),
        /// Shape of the wavelength image.
        wave: (usize, usize),
    },
}

/// Borrowed views of the three reduced-frame images for one detector.
///
/// The inverse-variance image encodes per-pixel precision; a value of zero
/// marks an unusable pixel (bad column, cosmic-ray hit, chip gap) and is the
/// only in-band bad-pixel signal this layer consumes.
#[derive(Debug, Clone, Copy)]
pub struct ReducedFrame<'a> {
    science: ArrayView2<'a, f64>,
    ivar: ArrayView2<'a, f64>,
    wave: ArrayView2<'a, f64>,
}

impl<'a> ReducedFrame<'a> {
    /// Bundle the three images, verifying they share a shape.
    pub fn new(
        science: ArrayView2<'a, f64>,
        ivar: ArrayView2<'a, f64>,
        wave: ArrayView2<'a, f64>,
    ) -> Result<Self, FrameError> {
        if science.dim() != ivar.dim() || science.dim() != wave.dim() {
            return Err(FrameError::ShapeMismatch {
                science: science.dim(),
                ivar: ivar.dim(),
                wave: wave.dim(),
            });
        }
        Ok(Self {
            science,
            ivar,
            wave,
        })
    }

    /// Rectified science image.
    pub fn science(&self) -> &ArrayView2<'a, f64> {
        &self.science
    }

    /// Inverse-variance image; zero marks an unusable pixel.
    pub fn ivar(&self) -> &ArrayView2<'a, f64> {
        &self.ivar
    }

    /// Wavelength image, monotonic along the dispersion axis.
    pub fn wave(&self) -> &ArrayView2<'a, f64> {
        &self.wave
    }

    /// (dispersion, spatial) shape shared by the three images.
    pub fn dim(&self) -> (usize, usize) {
        self.science.dim()
    }

    /// Number of dispersion rows.
    pub fn nrows(&self) -> usize {
        self.science.nrows()
    }

    /// Number of spatial columns.
    pub fn nspat(&self) -> usize {
        self.science.ncols()
    }
}

/// One sample of an object's spatial centroid path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    /// Dispersion row of the sample.
    pub row: usize,
    /// Fractional spatial column of the centroid at that row.
    pub col: f64,
}

/// Spatial centroid path of one object along the dispersion axis.
///
/// Produced by the upstream tracing stage and only borrowed here. Samples
/// are ordered by increasing row; rows may be missing where the tracer had
/// nothing to fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectTrace {
    /// Slit the object was detected in.
    pub slit_index: u32,
    /// Detector the slit falls on (1-based, instrument convention).
    pub detector_index: u32,
    /// Ordered (row, fractional column) centroid samples.
    pub points: Vec<TracePoint>,
    /// RMS residual of the upstream trace fit, in pixels.
    pub fit_rms: f64,
}

impl ObjectTrace {
    /// Median spatial column over samples inside `[0, nspat)`.
    ///
    /// This is the position the object's identifier is quantized from, so it
    /// ignores samples that wander off the detector. Returns `None` when no
    /// sample is inside the spatial extent.
    pub fn reference_col(&self, nspat: usize) -> Option<f64> {
        let inside: Vec<f64> = self
            .points
            .iter()
            .map(|p| p.col)
            .filter(|&c| c >= 0.0 && c < nspat as f64)
            .collect();
        crate::stats::median(&inside)
    }

    /// Median spatial column over all samples, clamped into `[0, nspat)`.
    ///
    /// Used to assign an in-bounds identifier to an expected object whose
    /// trace never enters the image.
    pub fn clamped_reference_col(&self, nspat: usize) -> f64 {
        let cols: Vec<f64> = self.points.iter().map(|p| p.col).collect();
        let center = crate::stats::median(&cols).unwrap_or(0.0);
        center.clamp(0.0, (nspat.saturating_sub(1)) as f64)
    }
}

/// Declared bounds of one exposure, used to validate identifier components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureLayout {
    /// Spatial columns in the detector active area.
    pub nspat: u32,
    /// Number of slits on the mask.
    pub nslits: u32,
    /// Number of detectors in the mosaic.
    pub ndetectors: u32,
}

/// Exposure-level metadata carried into container headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMeta {
    /// Instrument name, e.g. "keck_lris_blue".
    pub instrument: String,
    /// Exposure tag, typically the raw-frame basename.
    pub exposure: String,
    /// Declared bounds of this exposure.
    pub layout: ExposureLayout,
}

/// Classification of a spectral object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    /// Target of the observation.
    Science,
    /// Flux standard.
    Standard,
    /// Calibration source (alignment star, slitless standard).
    Calibration,
}

impl ObjectType {
    /// Header label for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Science => "SCIENCE",
            ObjectType::Standard => "STANDARD",
            ObjectType::Calibration => "CALIB",
        }
    }

    /// Reverse of [`ObjectType::as_str`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "SCIENCE" => Some(ObjectType::Science),
            "STANDARD" => Some(ObjectType::Standard),
            "CALIB" => Some(ObjectType::Calibration),
            _ => None,
        }
    }
}
