//! Small statistics helpers for summary quantities.

/// NaN-aware median. Returns `None` when no finite-comparable sample remains.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|a, b| a.partial_cmp(b).expect("NaN filtered above"));

    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        Some((valid[mid - 1] + valid[mid]) / 2.0)
    } else {
        Some(valid[mid])
    }
}

/// Conversion between a Gaussian sigma and its full width at half maximum.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Weighted mean and standard deviation of `values`.
///
/// Negative weights are clipped to zero. Returns `None` when the total
/// weight is not positive.
pub fn weighted_moments(values: &[f64], weights: &[f64]) -> Option<(f64, f64)> {
    debug_assert_eq!(values.len(), weights.len());

    let mut wsum = 0.0;
    let mut mean_acc = 0.0;
    for (&v, &w) in values.iter().zip(weights) {
        let w = w.max(0.0);
        wsum += w;
        mean_acc += w * v;
    }
    if wsum <= 0.0 {
        return None;
    }
    let mean = mean_acc / wsum;

    let mut var_acc = 0.0;
    for (&v, &w) in values.iter().zip(weights) {
        let w = w.max(0.0);
        var_acc += w * (v - mean) * (v - mean);
    }
    Some((mean, (var_acc / wsum).sqrt()))
}
