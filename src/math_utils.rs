//! Numeric helpers shared by the diagnostics, estimator and impact stages.

/// Total ordering for f64 that sorts NaN last
pub fn float_total_cmp(a: &f64, b: &f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.total_cmp(b),
    }
}

/// Arithmetic mean; NaN for empty input
#[inline]
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Unbiased sample variance via Welford's single pass; 0 for fewer than 2 values
pub fn sample_variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &value) in data.iter().enumerate() {
        let delta = value - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (value - mean);
    }
    (m2 / (data.len() - 1) as f64).max(0.0)
}

/// Series longer than this use the FFT path when enough lags are requested
const FFT_MIN_LENGTH: usize = 512;
const FFT_MIN_LAG: usize = 64;

/// Biased (1/n) autocovariance at lags `0..=max_lag` around `mean`.
///
/// Long series with many lags go through an FFT (O(n log n)); short ones use
/// the direct sum.
pub fn autocovariances(data: &[f64], mean: f64, max_lag: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 {
        return Vec::new();
    }
    let max_lag = max_lag.min(n - 1);
    if n > FFT_MIN_LENGTH && max_lag > FFT_MIN_LAG {
        autocovariances_fft(data, mean, max_lag)
    } else {
        autocovariances_direct(data, mean, max_lag)
    }
}

fn autocovariances_direct(data: &[f64], mean: f64, max_lag: usize) -> Vec<f64> {
    let n = data.len();
    (0..=max_lag)
        .map(|lag| {
            (0..n - lag)
                .map(|i| (data[i] - mean) * (data[i + lag] - mean))
                .sum::<f64>()
                / n as f64
        })
        .collect()
}

/// Wiener-Khinchin: IFFT(|FFT(x)|^2) over a zero-padded buffer of at least 2n
fn autocovariances_fft(data: &[f64], mean: f64, max_lag: usize) -> Vec<f64> {
    use rustfft::{num_complex::Complex, FftPlanner};

    let n = data.len();
    let fft_size = (2 * n).next_power_of_two();

    let mut signal: Vec<Complex<f64>> = data
        .iter()
        .map(|&x| Complex::new(x - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_size)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(fft_size).process(&mut signal);
    for value in signal.iter_mut() {
        *value = Complex::new(value.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(fft_size).process(&mut signal);

    // rustfft leaves the inverse unnormalised
    let scale = (fft_size * n) as f64;
    signal[..=max_lag].iter().map(|c| c.re / scale).collect()
}

/// Narrowest interval holding `probability` of the sample mass.
///
/// `sorted` must be ascending. Returns `(NaN, NaN)` for empty input.
pub fn highest_density_interval(sorted: &[f64], probability: f64) -> (f64, f64) {
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let span = ((probability * n as f64).floor() as usize).min(n - 1);
    let (mut lo, mut hi) = (sorted[0], sorted[span]);
    for i in 1..n - span {
        if sorted[i + span] - sorted[i] < hi - lo {
            lo = sorted[i];
            hi = sorted[i + span];
        }
    }
    (lo, hi)
}
