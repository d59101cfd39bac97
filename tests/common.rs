//! Common utilities for slitspec integration tests.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use slitspec::{
    ExposureLayout, ExposureMeta, ExtractionMethod, ObjectTrace, ObjectType, SpecObj, SpecObjId,
    SpecObjs, Spectrum1d, SpectrumSummary, TracePoint,
};

/// Configuration for synthetic reduced-frame generation.
#[derive(Debug, Clone)]
pub struct SyntheticFrameConfig {
    pub nrows: usize,
    pub ncols: usize,
    /// Constant science level per pixel.
    pub flux: f64,
    /// Constant inverse variance per pixel.
    pub ivar: f64,
    /// Wavelength of row 0.
    pub wave_start: f64,
    /// Wavelength increment per row.
    pub wave_step: f64,
}

impl Default for SyntheticFrameConfig {
    fn default() -> Self {
        Self {
            nrows: 64,
            ncols: 256,
            flux: 10.0,
            ivar: 2.0,
            wave_start: 4000.0,
            wave_step: 1.0,
        }
    }
}

/// Flat science, inverse-variance and wavelength images.
pub fn flat_frame(config: &SyntheticFrameConfig) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let sci = Array2::from_elem((config.nrows, config.ncols), config.flux);
    let ivar = Array2::from_elem((config.nrows, config.ncols), config.ivar);
    let wave = Array2::from_shape_fn((config.nrows, config.ncols), |(r, _)| {
        config.wave_start + config.wave_step * r as f64
    });
    (sci, ivar, wave)
}

/// Zero-mean Gaussian noise image with per-pixel standard deviation `sigma`,
/// plus the matching constant inverse-variance image.
pub fn noise_frame(
    config: &SyntheticFrameConfig,
    sigma: f64,
    seed: u64,
) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    use rand_distr::{Distribution, Normal};

    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma).expect("valid sigma");
    let sci = Array2::from_shape_fn((config.nrows, config.ncols), |_| normal.sample(&mut rng));
    let ivar = Array2::from_elem((config.nrows, config.ncols), 1.0 / (sigma * sigma));
    let wave = Array2::from_shape_fn((config.nrows, config.ncols), |(r, _)| {
        config.wave_start + config.wave_step * r as f64
    });
    (sci, ivar, wave)
}

/// Straight trace down one spatial column.
pub fn straight_trace(col: f64, nrows: usize, slit: u32, det: u32) -> ObjectTrace {
    ObjectTrace {
        slit_index: slit,
        detector_index: det,
        points: (0..nrows).map(|row| TracePoint { row, col }).collect(),
        fit_rms: 0.05,
    }
}

pub fn layout(ncols: usize) -> ExposureLayout {
    ExposureLayout {
        nspat: ncols as u32,
        nslits: 8,
        ndetectors: 4,
    }
}

pub fn meta(exposure: &str, ncols: usize) -> ExposureMeta {
    ExposureMeta {
        instrument: "test_multislit".to_string(),
        exposure: exposure.to_string(),
        layout: layout(ncols),
    }
}

/// Collection of `count` records with random but valid arrays, for
/// round-trip tests. Identifiers are spread over slits and detectors;
/// array lengths vary per object.
pub fn random_collection(exposure: &str, count: usize, seed: u64) -> SpecObjs {
    let mut rng = StdRng::seed_from_u64(seed);
    let layout = layout(2048);
    let mut specobjs = SpecObjs::new(ExposureMeta {
        instrument: "test_multislit".to_string(),
        exposure: exposure.to_string(),
        layout,
    });

    for i in 0..count {
        let spat = (17 * i as u32 + 23) % layout.nspat;
        let slit = i as u32 % layout.nslits;
        let det = 1 + (i as u32 / layout.nslits) % layout.ndetectors;
        let id = SpecObjId::new(spat, slit, det, &layout).unwrap();

        let n = 20 + (i % 30);
        let mut wave = Vec::with_capacity(n);
        let mut w = 4000.0 + rng.gen_range(0.0..10.0);
        for _ in 0..n {
            w += rng.gen_range(0.1..2.0);
            wave.push(w);
        }
        let mut flux = Vec::with_capacity(n);
        let mut ivar = Vec::with_capacity(n);
        let mut mask = Vec::with_capacity(n);
        for _ in 0..n {
            let good = rng.gen_range(0.0..1.0) > 0.1;
            if good {
                flux.push(rng.gen_range(-5.0..100.0));
                ivar.push(rng.gen_range(0.01..4.0));
            } else {
                flux.push(0.0);
                ivar.push(0.0);
            }
            mask.push(good);
        }

        let obj = SpecObj::new(
            id,
            ObjectType::Science,
            ExtractionMethod::Boxcar,
            Spectrum1d {
                wave: Array1::from_vec(wave),
                flux: Array1::from_vec(flux),
                ivar: Array1::from_vec(ivar),
                mask: Array1::from_vec(mask),
            },
            SpectrumSummary {
                s2n: rng.gen_range(0.0..50.0),
                fwhm: rng.gen_range(1.0..6.0),
                trace_rms: rng.gen_range(0.0..0.5),
            },
            Vec::new(),
        )
        .unwrap();
        specobjs.add(obj).unwrap();
    }
    specobjs
}
