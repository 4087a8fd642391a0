//! Magnitude of the regime shift implied by the posterior draws.

use crate::errors::{ChangePointError, EngineResult};
use crate::sampler::PosteriorSampleSet;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Regime-shift summary over all retained draws
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImpactSummary {
    /// Posterior mean of `mu_before`
    pub mean_before: f64,
    /// Posterior mean of `mu_after`
    pub mean_after: f64,
    /// `mean_after - mean_before`
    pub absolute_change: f64,
    /// Relative change in percent; `None` when `mean_before` is exactly zero
    pub percentage_change: Option<f64>,
    /// Change of the implied daily price factor, in percent
    pub implied_price_change: f64,
    /// Fraction of draws with `mu_after > mu_before`
    pub probability_increase: f64,
}

/// `(after - before) / |before| * 100`, or `None` when `before == 0`
pub fn percentage_change(before: f64, after: f64) -> Option<f64> {
    if before == 0.0 {
        None
    } else {
        Some((after - before) / before.abs() * 100.0)
    }
}

/// `(e^after - e^before) / e^before * 100`
pub fn implied_price_change(before: f64, after: f64) -> f64 {
    (after - before).exp_m1() * 100.0
}

/// Summarise the regime shift over every retained draw.
///
/// Fails with `InsufficientDraws` when the set is empty.
pub fn quantify_impact(samples: &PosteriorSampleSet) -> EngineResult<ImpactSummary> {
    let total = samples.total_draws();
    if total == 0 {
        return Err(ChangePointError::InsufficientDraws {
            operation: "quantify impact".to_string(),
            available: 0,
        });
    }

    let (mut sum_before, mut sum_after, mut increases) = (0.0, 0.0, 0usize);
    for draw in samples.draws() {
        sum_before += draw.state.mu_before;
        sum_after += draw.state.mu_after;
        if draw.state.mu_after > draw.state.mu_before {
            increases += 1;
        }
    }
    let mean_before = sum_before / total as f64;
    let mean_after = sum_after / total as f64;

    let percentage = percentage_change(mean_before, mean_after);
    if percentage.is_none() {
        log::warn!("Mean return before the break is exactly zero; percentage change undefined");
    }

    Ok(ImpactSummary {
        mean_before,
        mean_after,
        absolute_change: mean_after - mean_before,
        percentage_change: percentage,
        implied_price_change: implied_price_change(mean_before, mean_after),
        probability_increase: increases as f64 / total as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LatentState;
    use crate::sampler::{ChainSamples, Draw};
    use assert_approx_eq::assert_approx_eq;

    fn set(pairs: &[(f64, f64)]) -> PosteriorSampleSet {
        let draws = pairs
            .iter()
            .map(|&(b, a)| Draw {
                state: LatentState {
                    tau: 1,
                    mu_before: b,
                    mu_after: a,
                    sigma: 0.01,
                },
                log_likelihood: 0.0,
                log_posterior: 0.0,
            })
            .collect();
        PosteriorSampleSet::new(
            vec![ChainSamples {
                chain: 0,
                seed: 0,
                warmup_iterations: 0,
                thinning_factor: 1,
                sigma_step: 0.1,
                sigma_acceptance_rate: 0.5,
                draws,
            }],
            0,
        )
    }

    #[test]
    fn test_percentage_change_sign_uses_absolute_base() {
        assert_approx_eq!(percentage_change(-0.001, 0.004).unwrap(), 500.0, 1e-9);
        assert_approx_eq!(percentage_change(0.002, 0.001).unwrap(), -50.0, 1e-9);
    }

    #[test]
    fn test_zero_before_is_sentinel() {
        assert_eq!(percentage_change(0.0, 0.003), None);
        let summary = quantify_impact(&set(&[(0.0, 0.003), (0.0, 0.001)])).unwrap();
        assert_eq!(summary.percentage_change, None);
        assert_approx_eq!(summary.mean_after, 0.002, 1e-15);
    }

    #[test]
    fn test_means_over_all_draws() {
        let summary = quantify_impact(&set(&[(-0.002, 0.004), (0.0, 0.002), (-0.001, -0.003)])).unwrap();
        assert_approx_eq!(summary.mean_before, -0.001, 1e-15);
        assert_approx_eq!(summary.mean_after, 0.001, 1e-15);
        assert_approx_eq!(summary.absolute_change, 0.002, 1e-15);
        assert_approx_eq!(summary.percentage_change.unwrap(), 200.0, 1e-9);
        assert_approx_eq!(summary.probability_increase, 2.0 / 3.0, 1e-12);
        assert_approx_eq!(summary.implied_price_change, (0.002f64.exp() - 1.0) * 100.0, 1e-10);
    }

    #[test]
    fn test_empty_set_is_insufficient() {
        assert!(quantify_impact(&PosteriorSampleSet::exhausted(0)).is_err());
    }
}
