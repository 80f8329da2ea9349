//! Per-cell ensemble summary statistics.

use crate::models::{Statistic, StatisticValues};

/// Linear-interpolation quantile of an ascending, non-empty slice.
///
/// Uses `h = (n - 1) * p` and interpolates between the order statistics on
/// either side of `h`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = h.floor() as usize;
    let upper = h.ceil() as usize;
    let frac = h - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Summarize the finite entries of `values` (reordered in place).
///
/// Returns `None` when no value is finite. Standard deviation is the
/// population form (divides by `n`).
pub fn summarize(values: &mut Vec<f64>) -> Option<StatisticValues> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mut out = StatisticValues::undefined();
    out.set(Statistic::Mean, mean);
    out.set(Statistic::Median, quantile_sorted(values, 0.5));
    out.set(Statistic::StdDev, variance.sqrt());
    out.set(Statistic::Min, values[0]);
    out.set(Statistic::Max, values[values.len() - 1]);
    out.set(Statistic::Q1, quantile_sorted(values, 0.25));
    out.set(Statistic::Q3, quantile_sorted(values, 0.75));
    Some(out)
}
