use std::cmp::Ordering;

pub fn sort_samples(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

/// Middle value of a sorted slice; mean of the two middle values for even lengths.
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Nearest-rank p95 on a sorted slice: index `ceil(0.95 * n) - 1`.
pub fn p95(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = (0.95 * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

/// Sorts `values` and returns `(median, p95)`.
pub fn summarize(mut values: Vec<f64>) -> (Option<f64>, Option<f64>) {
    sort_samples(&mut values);
    (median(&values), p95(&values))
}
