//! The persisted unit of this layer: one extracted spectrum.
//!
//! A [`SpecObj`] couples an identifier to the extracted arrays and the
//! scalar provenance a downstream consumer needs to judge the extraction
//! (median signal-to-noise, spatial FWHM, trace fit quality). Records are
//! immutable after construction; operations that change a spectrum
//! (rebinning, coaddition) always produce a new record so the provenance of
//! the inputs is never lost.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::ObjectType;
use crate::identifier::SpecObjId;
use crate::stats;

/// Default minimum fraction of a rebin grid the object must cover.
pub const DEFAULT_MIN_REBIN_OVERLAP: f64 = 0.5;

/// Errors from record construction.
#[derive(Error, Debug)]
pub enum SpecObjError {
    /// The four arrays must share one length.
    #[error(
        "array length mismatch for {token}: wave {wave}, flux {flux}, ivar {ivar}, mask {mask}"
    )]
    ArrayLengthMismatch {
        /// Identifier token of the offending record.
        token: String,
        /// Length of the wavelength array.
        wave: usize,
        /// Length of the flux array.
        flux: usize,
        /// Length of the inverse-variance array.
        ivar: usize,
        /// Length of the mask array.
        mask: usize,
    },

    /// Wavelengths must be monotonically non-decreasing.
    #[error("wavelength array for {token} decreases at index {index}")]
    NonMonotonicWave {
        /// Identifier token of the offending record.
        token: String,
        /// First index where the array decreases.
        index: usize,
    },

    /// Inverse variance must be non-negative.
    #[error("negative inverse variance for {token} at index {index}")]
    NegativeIvar {
        /// Identifier token of the offending record.
        token: String,
        /// Index of the negative value.
        index: usize,
    },

    /// Unmasked samples must be finite; NaN never enters a persisted record.
    #[error("non-finite value in unmasked sample of {token} at index {index}")]
    NonFiniteSample {
        /// Identifier token of the offending record.
        token: String,
        /// Index of the non-finite value.
        index: usize,
    },
}

/// Errors from rebinning onto a new wavelength grid.
#[derive(Error, Debug)]
pub enum RebinError {
    /// The requested grid must be sorted ascending.
    #[error("rebin grid decreases at index {index}")]
    UnsortedGrid {
        /// First index where the grid decreases.
        index: usize,
    },

    /// The grid covers too little of the object's wavelength range.
    #[error("rebin grid overlaps {token} by fraction {overlap:.3}, need at least {required:.3}")]
    InsufficientOverlap {
        /// Identifier token of the record.
        token: String,
        /// Achieved overlap fraction.
        overlap: f64,
        /// Configured minimum.
        required: f64,
    },

    /// The rebinned record failed its own invariants.
    #[error(transparent)]
    Record(#[from] SpecObjError),
}

/// How a record's arrays were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    /// Fixed-width window sum around the trace.
    Boxcar,
    /// Profile-weighted extraction.
    Optimal,
    /// Placeholder for an expected object that was not detected.
    Undetected,
    /// Inverse-variance-weighted merge of records from several exposures.
    Coadded,
}

impl ExtractionMethod {
    /// Header label for this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Boxcar => "BOXCAR",
            ExtractionMethod::Optimal => "OPTIMAL",
            ExtractionMethod::Undetected => "UNDETECTED",
            ExtractionMethod::Coadded => "COADDED",
        }
    }

    /// Reverse of [`ExtractionMethod::as_str`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "BOXCAR" => Some(ExtractionMethod::Boxcar),
            "OPTIMAL" => Some(ExtractionMethod::Optimal),
            "UNDETECTED" => Some(ExtractionMethod::Undetected),
            "COADDED" => Some(ExtractionMethod::Coadded),
            _ => None,
        }
    }
}

/// Scalar provenance of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSummary {
    /// Median signal-to-noise over unmasked pixels at extraction time.
    pub s2n: f64,
    /// Median spatial FWHM of the object profile, in pixels.
    pub fwhm: f64,
    /// RMS residual of the upstream trace fit, in pixels.
    pub trace_rms: f64,
}

impl SpectrumSummary {
    /// All-zero summary for placeholder records.
    pub fn empty() -> Self {
        Self {
            s2n: 0.0,
            fwhm: 0.0,
            trace_rms: 0.0,
        }
    }
}

/// Reference to one record that contributed to a coadded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Identifier of the contributing record.
    pub id: SpecObjId,
    /// Exposure tag the record came from.
    pub exposure: String,
}

/// The four extracted arrays of one spectrum.
///
/// `mask` is true for usable samples. Masked samples keep their wavelength
/// (bin-edge bookkeeping needs it) but carry zero flux and zero inverse
/// variance, so no sentinel value can leak downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum1d {
    /// Wavelengths, monotonically non-decreasing.
    pub wave: Array1<f64>,
    /// Extracted flux per wavelength sample.
    pub flux: Array1<f64>,
    /// Inverse variance of the flux; zero means unusable.
    pub ivar: Array1<f64>,
    /// Validity flags, true = good.
    pub mask: Array1<bool>,
}

impl Spectrum1d {
    /// Zero-length spectrum for placeholder records.
    pub fn empty() -> Self {
        Self {
            wave: Array1::zeros(0),
            flux: Array1::zeros(0),
            ivar: Array1::zeros(0),
            mask: Array1::from_elem(0, false),
        }
    }

    /// Number of wavelength samples.
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    /// True when the spectrum has no samples.
    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    fn validate(&self, token: &str) -> Result<(), SpecObjError> {
        if self.flux.len() != self.wave.len()
            || self.ivar.len() != self.wave.len()
            || self.mask.len() != self.wave.len()
        {
            return Err(SpecObjError::ArrayLengthMismatch {
                token: token.to_string(),
                wave: self.wave.len(),
                flux: self.flux.len(),
                ivar: self.ivar.len(),
                mask: self.mask.len(),
            });
        }
        for i in 1..self.wave.len() {
            if self.wave[i] < self.wave[i - 1] {
                return Err(SpecObjError::NonMonotonicWave {
                    token: token.to_string(),
                    index: i,
                });
            }
        }
        for (i, &v) in self.ivar.iter().enumerate() {
            if v < 0.0 {
                return Err(SpecObjError::NegativeIvar {
                    token: token.to_string(),
                    index: i,
                });
            }
        }
        for i in 0..self.wave.len() {
            if self.mask[i]
                && !(self.wave[i].is_finite()
                    && self.flux[i].is_finite()
                    && self.ivar[i].is_finite())
            {
                return Err(SpecObjError::NonFiniteSample {
                    token: token.to_string(),
                    index: i,
                });
            }
        }
        Ok(())
    }
}

/// One extracted spectrum with identity and provenance.
#[derive(Debug, Clone)]
pub struct SpecObj {
    id: SpecObjId,
    object_type: ObjectType,
    method: ExtractionMethod,
    spectrum: Spectrum1d,
    summary: SpectrumSummary,
    provenance: Vec<SourceRef>,
}

impl SpecObj {
    /// Build a record, enforcing the array invariants.
    pub fn new(
        id: SpecObjId,
        object_type: ObjectType,
        method: ExtractionMethod,
        spectrum: Spectrum1d,
        summary: SpectrumSummary,
        provenance: Vec<SourceRef>,
    ) -> Result<Self, SpecObjError> {
        spectrum.validate(&id.name())?;
        Ok(Self {
            id,
            object_type,
            method,
            spectrum,
            summary,
            provenance,
        })
    }

    /// Placeholder record for an expected object that was not detected.
    ///
    /// Degenerate (zero-length) arrays with the `Undetected` method tag:
    /// a negative result is data, so downstream consumers always find one
    /// record per expected object.
    pub fn undetected(id: SpecObjId, object_type: ObjectType, trace_rms: f64) -> Self {
        Self {
            id,
            object_type,
            method: ExtractionMethod::Undetected,
            spectrum: Spectrum1d::empty(),
            summary: SpectrumSummary {
                trace_rms,
                ..SpectrumSummary::empty()
            },
            provenance: Vec::new(),
        }
    }

    /// The record's identifier.
    pub fn id(&self) -> SpecObjId {
        self.id
    }

    /// Canonical identifier token.
    pub fn name(&self) -> String {
        self.id.name()
    }

    /// Object classification.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// How the arrays were produced.
    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    /// The extracted arrays.
    pub fn spectrum(&self) -> &Spectrum1d {
        &self.spectrum
    }

    /// Scalar provenance recorded at extraction time.
    pub fn summary(&self) -> SpectrumSummary {
        self.summary
    }

    /// Contributing records (non-empty only on coadded records).
    pub fn provenance(&self) -> &[SourceRef] {
        &self.provenance
    }

    /// Number of wavelength samples.
    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    /// True when the record has no samples.
    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }

    /// True for an undetected placeholder.
    pub fn is_undetected(&self) -> bool {
        self.method == ExtractionMethod::Undetected
    }

    /// Median of `flux * sqrt(ivar)` over unmasked pixels; 0 when nothing
    /// is unmasked.
    pub fn median_snr(&self) -> f64 {
        let snr: Vec<f64> = self
            .spectrum
            .mask
            .iter()
            .zip(self.spectrum.flux.iter().zip(self.spectrum.ivar.iter()))
            .filter(|(m, _)| **m)
            .map(|(_, (&f, &iv))| f * iv.sqrt())
            .collect();
        stats::median(&snr).unwrap_or(0.0)
    }

    /// Rebin onto a new wavelength grid, producing a new record.
    ///
    /// Flux and inverse variance are linearly interpolated; a grid point is
    /// good only when both samples bracketing it in the original spectrum
    /// are good, so interpolation never bridges a masked gap. Points outside
    /// the object's good wavelength span are masked. Fails when the fraction
    /// of grid points inside the good span is below `min_overlap`.
    pub fn rebin(&self, grid: &Array1<f64>, min_overlap: f64) -> Result<SpecObj, RebinError> {
        for i in 1..grid.len() {
            if grid[i] < grid[i - 1] {
                return Err(RebinError::UnsortedGrid { index: i });
            }
        }

        let span = good_span(&self.spectrum);
        let covered = match span {
            None => 0,
            Some((lo, hi)) => grid.iter().filter(|&&w| w >= lo && w <= hi).count(),
        };
        let overlap = if grid.is_empty() {
            0.0
        } else {
            covered as f64 / grid.len() as f64
        };
        if overlap < min_overlap {
            return Err(RebinError::InsufficientOverlap {
                token: self.name(),
                overlap,
                required: min_overlap,
            });
        }

        let spectrum = resample_onto(&self.spectrum, grid);
        let rebinned = SpecObj::new(
            self.id,
            self.object_type,
            self.method,
            spectrum,
            self.summary,
            self.provenance.clone(),
        )?;
        Ok(SpecObj {
            summary: SpectrumSummary {
                s2n: rebinned.median_snr(),
                ..self.summary
            },
            ..rebinned
        })
    }
}

/// Wavelength span of the good samples, if any.
pub(crate) fn good_span(spectrum: &Spectrum1d) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    let mut any = false;
    for (i, &good) in spectrum.mask.iter().enumerate() {
        if good {
            lo = lo.min(spectrum.wave[i]);
            hi = hi.max(spectrum.wave[i]);
            any = true;
        }
    }
    any.then_some((lo, hi))
}

/// Linear interpolation of a spectrum onto `grid`.
///
/// Shared by [`SpecObj::rebin`] and the coadd engine. A grid point is good
/// only when both bracketing samples are good; everything else comes back
/// masked with zero flux and ivar.
pub(crate) fn resample_onto(spectrum: &Spectrum1d, grid: &Array1<f64>) -> Spectrum1d {
    let n = grid.len();
    let mut flux = Array1::<f64>::zeros(n);
    let mut ivar = Array1::<f64>::zeros(n);
    let mut mask = Array1::from_elem(n, false);

    let wave = &spectrum.wave;
    if wave.is_empty() {
        return Spectrum1d {
            wave: grid.clone(),
            flux,
            ivar,
            mask,
        };
    }

    for (g, &x) in grid.iter().enumerate() {
        // Index of the first sample with wave > x.
        let upper = wave.iter().position(|&w| w > x).unwrap_or(wave.len());
        let (left, right) = match upper {
            0 => continue,               // before the first sample
            u if u == wave.len() => {
                // Past the last sample unless it lands exactly on it.
                if x > wave[u - 1] {
                    continue;
                }
                (u - 1, u - 1)
            }
            u => {
                if wave[u - 1] == x {
                    (u - 1, u - 1)
                } else {
                    (u - 1, u)
                }
            }
        };

        if !(spectrum.mask[left] && spectrum.mask[right]) {
            continue;
        }
        if left == right {
            flux[g] = spectrum.flux[left];
            ivar[g] = spectrum.ivar[left];
        } else {
            let w0 = wave[left];
            let w1 = wave[right];
            let t = if w1 > w0 { (x - w0) / (w1 - w0) } else { 0.0 };
            flux[g] = spectrum.flux[left] * (1.0 - t) + spectrum.flux[right] * t;
            ivar[g] = spectrum.ivar[left] * (1.0 - t) + spectrum.ivar[right] * t;
        }
        mask[g] = ivar[g] > 0.0;
    }

    Spectrum1d {
        wave: grid.clone(),
        flux,
        ivar,
        mask,
    }
}
