//! Deterministic object naming.
//!
//! Every detected object gets a composite key built from its quantized
//! spatial position, slit index and detector index, rendered as a
//! fixed-width token such as `SPAT0176-SLIT0000-DET01`. The token doubles as
//! the persisted extension name, so a container file stays browsable without
//! loading this crate. Coadded records append a `-COADD` suffix to keep them
//! distinguishable from any single-exposure record at the same position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::ExposureLayout;

/// Errors from identifier construction and parsing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdError {
    /// A component falls outside the exposure's declared bounds.
    #[error("{component} {value} out of bounds ({low}..={high}) for this exposure")]
    ComponentOutOfBounds {
        /// Which component failed validation.
        component: &'static str,
        /// The offending value.
        value: i64,
        /// Lowest accepted value.
        low: u32,
        /// Highest accepted value.
        high: u32,
    },

    /// Token does not follow the `SPAT####-SLIT####-DET##[-COADD]` scheme.
    #[error("malformed identifier token: {token}")]
    MalformedToken {
        /// The rejected token.
        token: String,
    },
}

/// Composite key of one spectral object.
///
/// Spatial pixel and slit index are 0-based; the detector index is 1-based
/// following the instrument convention (`DET01` is the first detector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpecObjId {
    spatial_pixel: u32,
    slit_index: u32,
    detector_index: u32,
    combined: bool,
}

impl SpecObjId {
    /// Build an identifier from already-quantized components, validating
    /// each against the exposure layout.
    pub fn new(
        spatial_pixel: u32,
        slit_index: u32,
        detector_index: u32,
        layout: &ExposureLayout,
    ) -> Result<Self, IdError> {
        if layout.nspat == 0 || spatial_pixel >= layout.nspat {
            return Err(IdError::ComponentOutOfBounds {
                component: "spatial pixel",
                value: spatial_pixel as i64,
                low: 0,
                high: layout.nspat.saturating_sub(1),
            });
        }
        if layout.nslits == 0 || slit_index >= layout.nslits {
            return Err(IdError::ComponentOutOfBounds {
                component: "slit index",
                value: slit_index as i64,
                low: 0,
                high: layout.nslits.saturating_sub(1),
            });
        }
        if detector_index == 0 || detector_index > layout.ndetectors {
            return Err(IdError::ComponentOutOfBounds {
                component: "detector index",
                value: detector_index as i64,
                low: 1,
                high: layout.ndetectors,
            });
        }
        Ok(Self {
            spatial_pixel,
            slit_index,
            detector_index,
            combined: false,
        })
    }

    /// Quantize a fractional spatial centroid and build an identifier.
    ///
    /// Quantization uses `f64::round` (half away from zero). Two extractions
    /// of the same physical trace therefore always yield the same token.
    pub fn from_centroid(
        centroid: f64,
        slit_index: u32,
        detector_index: u32,
        layout: &ExposureLayout,
    ) -> Result<Self, IdError> {
        let rounded = centroid.round();
        if !rounded.is_finite() || rounded < 0.0 || rounded > u32::MAX as f64 {
            return Err(IdError::ComponentOutOfBounds {
                component: "spatial pixel",
                value: rounded as i64,
                low: 0,
                high: layout.nspat.saturating_sub(1),
            });
        }
        Self::new(rounded as u32, slit_index, detector_index, layout)
    }

    /// Quantized spatial pixel.
    pub fn spatial_pixel(&self) -> u32 {
        self.spatial_pixel
    }

    /// Slit index (0-based).
    pub fn slit_index(&self) -> u32 {
        self.slit_index
    }

    /// Detector index (1-based).
    pub fn detector_index(&self) -> u32 {
        self.detector_index
    }

    /// Whether this names a coadded record.
    pub fn is_combined(&self) -> bool {
        self.combined
    }

    /// The same position, renamed as a coadded record.
    pub fn into_combined(self) -> Self {
        Self {
            combined: true,
            ..self
        }
    }

    /// Canonical token, e.g. `SPAT0176-SLIT0000-DET01`.
    pub fn name(&self) -> String {
        let mut token = format!(
            "SPAT{:04}-SLIT{:04}-DET{:02}",
            self.spatial_pixel, self.slit_index, self.detector_index
        );
        if self.combined {
            token.push_str("-COADD");
        }
        token
    }

    /// Parse a canonical token back into its components.
    ///
    /// The reverse of [`SpecObjId::name`]; no bounds are checked since the
    /// token carries no layout. `parse(render(x)) == x` for every valid id.
    pub fn parse(token: &str) -> Result<Self, IdError> {
        let malformed = || IdError::MalformedToken {
            token: token.to_string(),
        };

        let mut parts = token.split('-');
        let spat = parse_component(parts.next(), "SPAT", 4).ok_or_else(malformed)?;
        let slit = parse_component(parts.next(), "SLIT", 4).ok_or_else(malformed)?;
        let det = parse_component(parts.next(), "DET", 2).ok_or_else(malformed)?;
        let combined = match parts.next() {
            None => false,
            Some("COADD") => true,
            Some(_) => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            spatial_pixel: spat,
            slit_index: slit,
            detector_index: det,
            combined,
        })
    }
}

/// Strip `prefix` and parse the zero-padded remainder.
fn parse_component(part: Option<&str>, prefix: &str, min_width: usize) -> Option<u32> {
    let digits = part?.strip_prefix(prefix)?;
    if digits.len() < min_width || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for SpecObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SpecObjId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
