//! SLITSPEC - Spectral-object extraction and bookkeeping for slit
//! spectroscopy.
//!
//! Takes the rectified products of upstream detector reduction (science,
//! inverse-variance and wavelength images plus per-object traces) and turns
//! them into identified, extracted, persistable one-dimensional spectra:
//!
//! - [`identifier`]: deterministic `SPAT####-SLIT####-DET##` object naming
//! - [`extract`]: boxcar / optimal / placeholder extraction per object
//! - [`specobj`]: the immutable extracted-spectrum record
//! - [`specobjs`]: the ordered per-exposure collection
//! - [`coadd`]: cross-exposure matching and weighted combination
//! - [`io`]: multi-extension FITS persistence with atomic replacement

pub mod coadd;
pub mod extract;
pub mod frame;
pub mod identifier;
pub mod io;
pub mod specobj;
pub mod specobjs;
pub mod stats;

// Re-export commonly used types for external use
pub use coadd::{combine_exposures, CoaddError, MatchConfig};
pub use extract::{
    extract_exposure, extract_object, ExtractionError, ExtractionPlan, ExtractionRequest,
};
pub use frame::{
    ExposureLayout, ExposureMeta, FrameError, ObjectTrace, ObjectType, ReducedFrame, TracePoint,
};
pub use identifier::{IdError, SpecObjId};
pub use io::{read_specobjs, spec1d_filename, write_obj_info, write_specobjs, SpecFileError};
pub use specobj::{
    ExtractionMethod, RebinError, SourceRef, SpecObj, SpecObjError, Spectrum1d, SpectrumSummary,
    DEFAULT_MIN_REBIN_OVERLAP,
};
pub use specobjs::{CollectionError, SpecObjs};
