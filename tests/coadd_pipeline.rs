//! Extraction of repeat exposures followed by coaddition and persistence.

mod common;

use approx::assert_relative_eq;
use common::{flat_frame, meta, straight_trace, SyntheticFrameConfig};
use slitspec::{
    combine_exposures, extract_exposure, read_specobjs, write_specobjs, ExtractionMethod,
    ExtractionPlan, ExtractionRequest, MatchConfig, ObjectType, ReducedFrame,
};
use tempfile::TempDir;

fn extract_one(config: &SyntheticFrameConfig, exposure: &str, col: f64) -> slitspec::SpecObjs {
    let (sci, ivar, wave) = flat_frame(config);
    let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();
    let trace = straight_trace(col, config.nrows, 0, 1);
    let requests = vec![ExtractionRequest {
        trace: &trace,
        plan: ExtractionPlan::Boxcar { radius: 3 },
        object_type: ObjectType::Science,
    }];
    extract_exposure(&frame, &requests, meta(exposure, config.ncols)).unwrap()
}

#[test]
fn test_dithered_repeat_exposures_coadd_and_persist() {
    let config = SyntheticFrameConfig::default();

    // Same object, dithered by two pixels between exposures.
    let exp1 = extract_one(&config, "frame0001", 100.0);
    let exp2 = extract_one(&config, "frame0002", 102.0);

    let combined = combine_exposures(&[exp1, exp2], &MatchConfig::default()).unwrap();
    assert_eq!(combined.len(), 1);

    let merged = combined.iter().next().unwrap();
    assert_eq!(merged.name(), "SPAT0100-SLIT0000-DET01-COADD");
    assert_eq!(merged.method(), ExtractionMethod::Coadded);
    assert_eq!(merged.provenance().len(), 2);
    assert_eq!(merged.provenance()[0].exposure, "frame0001");
    assert_eq!(merged.provenance()[1].exposure, "frame0002");

    // Identical flat-field inputs: the merge reproduces the per-exposure
    // spectrum with doubled inverse variance.
    let k = 7.0;
    for i in 0..merged.len() {
        assert!(merged.spectrum().mask[i]);
        assert_relative_eq!(merged.spectrum().flux[i], k * config.flux);
        assert_relative_eq!(merged.spectrum().ivar[i], 2.0 * config.ivar / k);
    }

    // The coadded collection persists and reads back like any other.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("spec1d_coadd.fits");
    write_specobjs(&combined, &path).unwrap();
    let back = read_specobjs(&path).unwrap();

    assert_eq!(back.meta().exposure, "frame0001+frame0002");
    let record = back.iter().next().unwrap();
    assert_eq!(record.id(), merged.id());
    assert!(record.id().is_combined());
    assert_eq!(record.provenance(), merged.provenance());
    assert_eq!(record.spectrum().flux, merged.spectrum().flux);
}

#[test]
fn test_disjoint_exposures_combine_to_nothing() {
    let config = SyntheticFrameConfig::default();

    // Objects on different slits never match across exposures; the
    // combiner reports gaps rather than inventing records.
    let (sci, ivar, wave) = flat_frame(&config);
    let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();

    let t1 = straight_trace(60.0, config.nrows, 0, 1);
    let t2 = straight_trace(60.0, config.nrows, 1, 1);
    let exp1 = extract_exposure(
        &frame,
        &[ExtractionRequest {
            trace: &t1,
            plan: ExtractionPlan::Boxcar { radius: 3 },
            object_type: ObjectType::Science,
        }],
        meta("frame0001", config.ncols),
    )
    .unwrap();
    let exp2 = extract_exposure(
        &frame,
        &[ExtractionRequest {
            trace: &t2,
            plan: ExtractionPlan::Boxcar { radius: 3 },
            object_type: ObjectType::Science,
        }],
        meta("frame0002", config.ncols),
    )
    .unwrap();

    let combined = combine_exposures(&[exp1, exp2], &MatchConfig::default()).unwrap();
    assert!(combined.is_empty());
}
