//! FITS persistence of a spectral-object collection.
//!
//! One container file per exposure: an empty primary HDU whose header
//! describes the collection (instrument, exposure tag, declared layout,
//! record count and one `EXT%04d` pointer per record), followed by one
//! binary-table extension per object. Each extension is named by the
//! object's identifier token, so the file is browsable with any FITS tool
//! without loading this crate. Table columns are `WAVE`, `FLUX`, `IVAR`
//! (doubles) and `MASK` (1 = good); the scalar provenance lives in the
//! extension header.
//!
//! Writes go to a sibling temporary file that is atomically renamed into
//! place on success, so a crash or I/O failure never replaces a previously
//! persisted container with a half-written one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use thiserror::Error;

use crate::frame::{ExposureLayout, ExposureMeta, ObjectType};
use crate::identifier::{IdError, SpecObjId};
use crate::specobj::{ExtractionMethod, SourceRef, SpecObj, SpecObjError, Spectrum1d, SpectrumSummary};
use crate::specobjs::{CollectionError, SpecObjs};

/// Errors from container persistence.
#[derive(Error, Debug)]
pub enum SpecFileError {
    /// FITS layer failure.
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Filesystem failure outside the FITS layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The container does not follow the expected schema.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// An extension name failed to parse as an identifier token.
    #[error("bad extension name: {0}")]
    Id(#[from] IdError),

    /// A read record failed its invariants.
    #[error("read record failed validation: {0}")]
    Record(#[from] SpecObjError),

    /// Rebuilding the collection failed.
    #[error("collection rebuild failed: {0}")]
    Collection(#[from] CollectionError),
}

/// Conventional container name for an exposure basename, e.g.
/// `spec1d_b27.fits`.
pub fn spec1d_filename(basename: &str) -> String {
    format!("spec1d_{basename}.fits")
}

/// Persist a collection to `path` atomically.
///
/// The container is first written to `<path>.tmp` in the same directory and
/// renamed over `path` only after every record has been written and the
/// file handle closed. On failure the temporary file is removed and any
/// previously persisted container is left untouched.
pub fn write_specobjs(specobjs: &SpecObjs, path: &Path) -> Result<(), SpecFileError> {
    let tmp = temp_path(path);
    match write_container(specobjs, &tmp) {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            log::info!(
                "wrote {} record(s) for exposure {} to {}",
                specobjs.len(),
                specobjs.meta().exposure,
                path.display()
            );
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_container(specobjs: &SpecObjs, path: &Path) -> Result<(), SpecFileError> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;
    let meta = specobjs.meta();

    let primary = fptr.primary_hdu()?;
    primary.write_key(&mut fptr, "INSTRUME", meta.instrument.clone())?;
    primary.write_key(&mut fptr, "EXPOSURE", meta.exposure.clone())?;
    primary.write_key(&mut fptr, "NSPAT", meta.layout.nspat as i64)?;
    primary.write_key(&mut fptr, "NSLITS", meta.layout.nslits as i64)?;
    primary.write_key(&mut fptr, "NDET", meta.layout.ndetectors as i64)?;
    primary.write_key(&mut fptr, "NSPEC", specobjs.len() as i64)?;
    for (i, obj) in specobjs.iter().enumerate() {
        primary.write_key(&mut fptr, &format!("EXT{:04}", i + 1), obj.name())?;
    }

    for obj in specobjs.iter() {
        write_record(&mut fptr, obj)?;
    }
    Ok(())
}

fn write_record(fptr: &mut FitsFile, obj: &SpecObj) -> Result<(), SpecFileError> {
    let columns = [
        ColumnDescription::new("WAVE")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("FLUX")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("IVAR")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("MASK")
            .with_type(ColumnDataType::Int)
            .create()?,
    ];
    let hdu = fptr.create_table(obj.name(), &columns)?;

    let spectrum = obj.spectrum();
    if !spectrum.is_empty() {
        hdu.write_col(fptr, "WAVE", &spectrum.wave.to_vec())?;
        hdu.write_col(fptr, "FLUX", &spectrum.flux.to_vec())?;
        hdu.write_col(fptr, "IVAR", &spectrum.ivar.to_vec())?;
        let mask: Vec<i32> = spectrum.mask.iter().map(|&m| i32::from(m)).collect();
        hdu.write_col(fptr, "MASK", &mask)?;
    }

    let id = obj.id();
    hdu.write_key(fptr, "SPAT", id.spatial_pixel() as i64)?;
    hdu.write_key(fptr, "SLIT", id.slit_index() as i64)?;
    hdu.write_key(fptr, "DET", id.detector_index() as i64)?;
    hdu.write_key(fptr, "COADD", i64::from(id.is_combined()))?;
    hdu.write_key(fptr, "OBJTYPE", obj.object_type().as_str().to_string())?;
    hdu.write_key(fptr, "EXTRMETH", obj.method().as_str().to_string())?;

    let summary = obj.summary();
    hdu.write_key(fptr, "S2N", summary.s2n)?;
    hdu.write_key(fptr, "FWHM", summary.fwhm)?;
    hdu.write_key(fptr, "TRACERMS", summary.trace_rms)?;

    hdu.write_key(fptr, "NSRC", obj.provenance().len() as i64)?;
    for (i, src) in obj.provenance().iter().enumerate() {
        hdu.write_key(fptr, &format!("SRC{:03}", i + 1), src.id.name())?;
        hdu.write_key(fptr, &format!("SEXP{:03}", i + 1), src.exposure.clone())?;
    }
    Ok(())
}

/// Read a collection back from a container written by [`write_specobjs`].
///
/// Round-trip contract: identical identifiers, array lengths and contents
/// (the on-disk columns are 64-bit floats, so values survive bit for bit)
/// and identical record ordering.
pub fn read_specobjs(path: &Path) -> Result<SpecObjs, SpecFileError> {
    let mut fptr = FitsFile::open(path)?;

    let primary = fptr.primary_hdu()?;
    let meta = ExposureMeta {
        instrument: primary.read_key::<String>(&mut fptr, "INSTRUME")?,
        exposure: primary.read_key::<String>(&mut fptr, "EXPOSURE")?,
        layout: ExposureLayout {
            nspat: primary.read_key::<i64>(&mut fptr, "NSPAT")? as u32,
            nslits: primary.read_key::<i64>(&mut fptr, "NSLITS")? as u32,
            ndetectors: primary.read_key::<i64>(&mut fptr, "NDET")? as u32,
        },
    };
    let nspec = primary.read_key::<i64>(&mut fptr, "NSPEC")?;

    let mut names = Vec::with_capacity(nspec as usize);
    for i in 1..=nspec {
        names.push(primary.read_key::<String>(&mut fptr, &format!("EXT{i:04}"))?);
    }

    let mut specobjs = SpecObjs::new(meta);
    for name in names {
        specobjs.add(read_record(&mut fptr, &name)?)?;
    }
    Ok(specobjs)
}

fn read_record(fptr: &mut FitsFile, name: &str) -> Result<SpecObj, SpecFileError> {
    let hdu = fptr.hdu(name)?;
    let id = SpecObjId::parse(name)?;

    let nrows = hdu.read_key::<i64>(fptr, "NAXIS2")?;
    let spectrum = if nrows == 0 {
        Spectrum1d::empty()
    } else {
        let wave: Vec<f64> = hdu.read_col(fptr, "WAVE")?;
        let flux: Vec<f64> = hdu.read_col(fptr, "FLUX")?;
        let ivar: Vec<f64> = hdu.read_col(fptr, "IVAR")?;
        let mask: Vec<i32> = hdu.read_col(fptr, "MASK")?;
        Spectrum1d {
            wave: wave.into(),
            flux: flux.into(),
            ivar: ivar.into(),
            mask: mask.iter().map(|&m| m != 0).collect::<Vec<bool>>().into(),
        }
    };

    let objtype_label = hdu.read_key::<String>(fptr, "OBJTYPE")?;
    let object_type = ObjectType::from_label(&objtype_label).ok_or_else(|| {
        SpecFileError::MalformedContainer(format!(
            "unknown object type {objtype_label:?} in extension {name}"
        ))
    })?;
    let method_label = hdu.read_key::<String>(fptr, "EXTRMETH")?;
    let method = ExtractionMethod::from_label(&method_label).ok_or_else(|| {
        SpecFileError::MalformedContainer(format!(
            "unknown extraction method {method_label:?} in extension {name}"
        ))
    })?;

    let summary = SpectrumSummary {
        s2n: hdu.read_key::<f64>(fptr, "S2N")?,
        fwhm: hdu.read_key::<f64>(fptr, "FWHM")?,
        trace_rms: hdu.read_key::<f64>(fptr, "TRACERMS")?,
    };

    let nsrc = hdu.read_key::<i64>(fptr, "NSRC")?;
    let mut provenance = Vec::with_capacity(nsrc as usize);
    for i in 1..=nsrc {
        let token = hdu.read_key::<String>(fptr, &format!("SRC{i:03}"))?;
        let exposure = hdu.read_key::<String>(fptr, &format!("SEXP{i:03}"))?;
        provenance.push(SourceRef {
            id: SpecObjId::parse(&token)?,
            exposure,
        });
    }

    Ok(SpecObj::new(
        id,
        object_type,
        method,
        spectrum,
        summary,
        provenance,
    )?)
}

/// Write the fixed-width ASCII summary table that sits next to the
/// container, one line per record.
pub fn write_obj_info(specobjs: &SpecObjs, path: &Path) -> Result<(), SpecFileError> {
    let mut out = fs::File::create(path)?;
    writeln!(
        out,
        "| {:>4} | {:>29} | {:>11} | {:>8} | {:>10} | {:>8} | {:>6} |",
        "slit", "name", "spat_pixpos", "objtype", "method", "s2n", "fwhm"
    )?;
    for obj in specobjs.iter() {
        let summary = obj.summary();
        writeln!(
            out,
            "| {:>4} | {:>29} | {:>11} | {:>8} | {:>10} | {:>8.2} | {:>6.3} |",
            obj.id().slit_index(),
            obj.name(),
            obj.id().spatial_pixel(),
            obj.object_type().as_str(),
            obj.method().as_str(),
            summary.s2n,
            summary.fwhm,
        )?;
    }
    out.flush()?;
    Ok(())
}
