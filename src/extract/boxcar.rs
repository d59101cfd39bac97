//! Boxcar extraction kernel.
//!
//! Sums flux over a fixed spatial window centred on the trace at each
//! dispersion row. Variance propagates in quadrature: the window variance is
//! the sum of the per-pixel variances of the usable pixels, so the reported
//! inverse variance is `1 / sum(1 / ivar_i)`.

use crate::frame::{ObjectTrace, ReducedFrame};
use crate::stats;

use super::RowSamples;

/// Run boxcar extraction along `trace` with the given half-width.
pub(crate) fn extract(frame: &ReducedFrame, trace: &ObjectTrace, radius: usize) -> RowSamples {
    let (nrows, ncols) = frame.dim();
    let mut samples = RowSamples::with_capacity(trace.points.len());

    for point in &trace.points {
        let row = point.row.min(nrows.saturating_sub(1));
        let center = point.col.round() as isize;

        if center < 0 || center >= ncols as isize {
            let clamped = center.clamp(0, ncols as isize - 1) as usize;
            samples.push_masked(frame.wave()[[row, clamped]]);
            samples.out_rows += 1;
            continue;
        }
        let center = center as usize;

        let lo = center.saturating_sub(radius);
        let hi = (center + radius).min(ncols - 1);

        let mut flux_sum = 0.0;
        let mut var_sum = 0.0;
        let mut ngood = 0usize;
        let mut window_cols = Vec::with_capacity(hi - lo + 1);
        let mut window_flux = Vec::with_capacity(hi - lo + 1);
        for col in lo..=hi {
            let iv = frame.ivar()[[row, col]];
            if iv > 0.0 {
                flux_sum += frame.science()[[row, col]];
                var_sum += 1.0 / iv;
                ngood += 1;
                window_cols.push(col as f64);
                window_flux.push(frame.science()[[row, col]]);
            }
        }

        let wave = frame.wave()[[row, center]];
        if ngood == 0 {
            samples.push_masked(wave);
            continue;
        }
        samples.push_good(wave, flux_sum, 1.0 / var_sum);

        if let Some((_, sigma)) = stats::weighted_moments(&window_cols, &window_flux) {
            if sigma > 0.0 {
                samples.fwhm_rows.push(sigma * stats::FWHM_PER_SIGMA);
            }
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::TracePoint;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn frame_parts(
        nrows: usize,
        ncols: usize,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let sci = Array2::from_elem((nrows, ncols), 3.0);
        let ivar = Array2::from_elem((nrows, ncols), 0.25);
        let wave = Array2::from_shape_fn((nrows, ncols), |(r, _)| 5000.0 + 2.0 * r as f64);
        (sci, ivar, wave)
    }

    fn trace_at(col: f64, nrows: usize) -> ObjectTrace {
        ObjectTrace {
            slit_index: 0,
            detector_index: 1,
            points: (0..nrows).map(|row| TracePoint { row, col }).collect(),
            fit_rms: 0.0,
        }
    }

    #[test]
    fn test_window_sum_and_variance() {
        let (sci, ivar, wave) = frame_parts(5, 20);
        let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();
        let samples = extract(&frame, &trace_at(10.0, 5), 2);

        assert_eq!(samples.out_rows, 0);
        for i in 0..5 {
            assert!(samples.mask[i]);
            assert_relative_eq!(samples.flux[i], 5.0 * 3.0);
            // Five pixels of variance 4 sum to variance 20.
            assert_relative_eq!(samples.ivar[i], 1.0 / 20.0);
            assert_relative_eq!(samples.wave[i], 5000.0 + 2.0 * i as f64);
        }
    }

    #[test]
    fn test_window_clips_at_edge() {
        let (sci, ivar, wave) = frame_parts(3, 20);
        let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();
        // Center at column 1 with radius 3: only columns 0..=4 exist.
        let samples = extract(&frame, &trace_at(1.0, 3), 3);

        assert!(samples.mask[0]);
        assert_relative_eq!(samples.flux[0], 5.0 * 3.0);
    }

    #[test]
    fn test_bad_pixels_skipped() {
        let (sci, mut ivar, wave) = frame_parts(2, 20);
        ivar[[0, 9]] = 0.0;
        let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();
        let samples = extract(&frame, &trace_at(10.0, 2), 2);

        // Row 0 lost one of its five pixels.
        assert_relative_eq!(samples.flux[0], 4.0 * 3.0);
        assert_relative_eq!(samples.ivar[0], 1.0 / 16.0);
        assert_relative_eq!(samples.flux[1], 5.0 * 3.0);
    }

    #[test]
    fn test_all_bad_row_is_masked_not_out() {
        let (sci, mut ivar, wave) = frame_parts(2, 20);
        for col in 0..20 {
            ivar[[1, col]] = 0.0;
        }
        let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();
        let samples = extract(&frame, &trace_at(10.0, 2), 2);

        assert_eq!(samples.out_rows, 0);
        assert!(samples.mask[0]);
        assert!(!samples.mask[1]);
        assert_relative_eq!(samples.wave[1], 5002.0);
    }

    #[test]
    fn test_gaussian_profile_fwhm_estimate() {
        let nrows = 4;
        let ncols = 41;
        let sigma = 2.0;
        let sci = Array2::from_shape_fn((nrows, ncols), |(_, c)| {
            let d = c as f64 - 20.0;
            100.0 * (-d * d / (2.0 * sigma * sigma)).exp()
        });
        let ivar = Array2::from_elem((nrows, ncols), 1.0);
        let wave = Array2::from_shape_fn((nrows, ncols), |(r, _)| 5000.0 + r as f64);
        let frame = ReducedFrame::new(sci.view(), ivar.view(), wave.view()).unwrap();

        let samples = extract(&frame, &trace_at(20.0, nrows), 10);
        assert_eq!(samples.fwhm_rows.len(), nrows);
        for &fwhm in &samples.fwhm_rows {
            assert_relative_eq!(fwhm, sigma * stats::FWHM_PER_SIGMA, epsilon = 0.15);
        }
    }
}
