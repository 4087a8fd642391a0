//! Single change-point model for a series of log-returns.
//!
//! ```text
//! tau        ~ DiscreteUniform{lo, ..., hi}
//! mu_before  ~ Normal(m0, s0)
//! mu_after   ~ Normal(m0, s0)
//! sigma      ~ HalfNormal(h)
//! x_i | .    ~ Normal(mu_before if i <= tau else mu_after, sigma)
//! ```
//!
//! `m0` is the empirical mean, `s0 = prior_width * sd` and
//! `h = sigma_prior_factor * sd` with `sd` the empirical standard deviation.
//!
//! Building the model precomputes prefix sums of the centered returns and their
//! squares. Any segment's sum of squared deviations from a candidate mean is
//! then O(1), which makes enumerating every break position O(N).

use crate::config::EngineConfig;
use crate::errors::{validate_all_finite, validate_data_length, ChangePointError, EngineResult};
use crate::series::ReturnSeries;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};
use statrs::statistics::Statistics;
use std::f64::consts::{LN_2, PI};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Shortest series the model accepts
pub const MIN_SERIES_LENGTH: usize = 10;

/// Variance below which a series is treated as constant
const ZERO_VARIANCE_THRESHOLD: f64 = 1e-13;

/// One joint value of the latent variables
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatentState {
    /// Last index of the "before" regime
    pub tau: usize,
    /// Mean log-return before the break
    pub mu_before: f64,
    /// Mean log-return after the break
    pub mu_after: f64,
    /// Shared volatility
    pub sigma: f64,
}

/// Count, sum and sum of squares of a contiguous run of centered returns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentStats {
    /// Number of observations
    pub count: usize,
    /// Sum of centered returns
    pub sum: f64,
    /// Sum of squared centered returns
    pub sum_sq: f64,
}

impl SegmentStats {
    /// Sum of squared deviations from `centered_mean`
    #[inline]
    pub fn squared_deviations(&self, centered_mean: f64) -> f64 {
        let n = self.count as f64;
        (self.sum_sq - 2.0 * centered_mean * self.sum + n * centered_mean * centered_mean).max(0.0)
    }
}

/// Prefix sums of centered returns and squared centered returns
#[derive(Debug, Clone)]
pub struct CumulativeSums {
    center: f64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl CumulativeSums {
    /// O(N) precomputation; `center` is subtracted from every value first
    pub fn new(values: &[f64], center: f64) -> Self {
        let mut sum = Vec::with_capacity(values.len() + 1);
        let mut sum_sq = Vec::with_capacity(values.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        let (mut s, mut s2) = (0.0, 0.0);
        for &v in values {
            let c = v - center;
            s += c;
            s2 += c * c;
            sum.push(s);
            sum_sq.push(s2);
        }
        Self { center, sum, sum_sq }
    }

    /// Number of underlying observations
    pub fn len(&self) -> usize {
        self.sum.len() - 1
    }

    /// Whether there are no observations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value subtracted before accumulating
    pub fn center(&self) -> f64 {
        self.center
    }

    /// Statistics of indices `[start, end)`
    #[inline]
    pub fn segment(&self, start: usize, end: usize) -> SegmentStats {
        SegmentStats {
            count: end - start,
            sum: self.sum[end] - self.sum[start],
            sum_sq: self.sum_sq[end] - self.sum_sq[start],
        }
    }

    /// Statistics of the "before" regime `[0, tau]`
    #[inline]
    pub fn before(&self, tau: usize) -> SegmentStats {
        self.segment(0, tau + 1)
    }

    /// Statistics of the "after" regime `(tau, N-1]`
    #[inline]
    pub fn after(&self, tau: usize) -> SegmentStats {
        self.segment(tau + 1, self.len())
    }

    /// Total squared deviations of the series split at `tau`
    #[inline]
    pub fn split_squared_deviations(&self, tau: usize, mu_before: f64, mu_after: f64) -> f64 {
        self.before(tau).squared_deviations(mu_before - self.center)
            + self.after(tau).squared_deviations(mu_after - self.center)
    }
}

/// Prior hyperparameters resolved against the data
#[derive(Debug, Clone, Copy)]
pub struct ModelPriors {
    /// Prior mean of both regime means
    pub mu_mean: f64,
    /// Prior sd of both regime means
    pub mu_sd: f64,
    /// Half-normal scale of sigma
    pub sigma_scale: f64,
    /// Smallest admissible break index
    pub tau_lower: usize,
    /// Largest admissible break index
    pub tau_upper: usize,
    mu_prior: Normal,
    sigma_prior: Normal,
}

impl ModelPriors {
    /// Log-density of the regime-mean prior
    pub fn ln_mu(&self, mu: f64) -> f64 {
        self.mu_prior.ln_pdf(mu)
    }

    /// Log-density of the half-normal sigma prior (`-inf` for sigma <= 0)
    pub fn ln_sigma(&self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            f64::NEG_INFINITY
        } else {
            LN_2 + self.sigma_prior.ln_pdf(sigma)
        }
    }

    /// Log-probability of the discrete-uniform tau prior
    pub fn ln_tau(&self, tau: usize) -> f64 {
        if (self.tau_lower..=self.tau_upper).contains(&tau) {
            -((self.tau_upper - self.tau_lower + 1) as f64).ln()
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Built change-point model: data, sufficient statistics and priors
#[derive(Debug, Clone)]
pub struct ChangePointModel {
    series: Arc<ReturnSeries>,
    sums: CumulativeSums,
    priors: ModelPriors,
    empirical_mean: f64,
    empirical_sd: f64,
}

impl ChangePointModel {
    /// Build the model for `series` under `config`.
    ///
    /// Fails with `Configuration` if the series is shorter than
    /// [`MIN_SERIES_LENGTH`], holds a non-finite value, is constant, or the
    /// tau window selects no index.
    pub fn build(series: Arc<ReturnSeries>, config: &EngineConfig) -> EngineResult<Self> {
        let returns = series.returns();
        validate_data_length(returns, MIN_SERIES_LENGTH).map_err(|err| match err {
            ChangePointError::InsufficientData { required, actual } => {
                ChangePointError::Configuration {
                    parameter: "series length".to_string(),
                    value: actual.to_string(),
                    constraint: format!("at least {} observations", required),
                }
            }
            other => other,
        })?;
        validate_all_finite(returns, "log_returns")?;

        let n = returns.len();
        let empirical_mean = returns.mean();
        let variance = returns.variance();
        if variance <= ZERO_VARIANCE_THRESHOLD {
            return Err(ChangePointError::Configuration {
                parameter: "series variance".to_string(),
                value: variance.to_string(),
                constraint: format!("greater than {:e} (series is constant)", ZERO_VARIANCE_THRESHOLD),
            });
        }
        let empirical_sd = variance.sqrt();

        let (lower_fraction, upper_fraction) = config.tau_window;
        let tau_lower = (lower_fraction * n as f64).floor() as usize;
        let tau_upper = ((upper_fraction * n as f64).floor() as usize).min(n - 1);
        if tau_lower > tau_upper {
            return Err(ChangePointError::Configuration {
                parameter: "tau_window".to_string(),
                value: format!("({}, {})", lower_fraction, upper_fraction),
                constraint: format!("a window selecting at least one of {} indices", n),
            });
        }

        let mu_sd = config.prior_width * empirical_sd;
        let sigma_scale = config.sigma_prior_factor * empirical_sd;
        let mu_prior = Normal::new(empirical_mean, mu_sd).map_err(|e| {
            ChangePointError::Configuration {
                parameter: "prior_width".to_string(),
                value: config.prior_width.to_string(),
                constraint: format!("a valid Normal prior ({})", e),
            }
        })?;
        let sigma_prior = Normal::new(0.0, sigma_scale).map_err(|e| {
            ChangePointError::Configuration {
                parameter: "sigma_prior_factor".to_string(),
                value: config.sigma_prior_factor.to_string(),
                constraint: format!("a valid half-normal prior ({})", e),
            }
        })?;

        let sums = CumulativeSums::new(returns, empirical_mean);

        log::info!(
            "Built change-point model: n = {}, tau in [{}, {}], mu ~ N({:.6}, {:.6}), sigma ~ HalfNormal({:.6})",
            n,
            tau_lower,
            tau_upper,
            empirical_mean,
            mu_sd,
            sigma_scale
        );

        Ok(Self {
            series,
            sums,
            priors: ModelPriors {
                mu_mean: empirical_mean,
                mu_sd,
                sigma_scale,
                tau_lower,
                tau_upper,
                mu_prior,
                sigma_prior,
            },
            empirical_mean,
            empirical_sd,
        })
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.sums.len()
    }

    /// Always false for a built model
    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// The modelled series
    pub fn series(&self) -> &Arc<ReturnSeries> {
        &self.series
    }

    /// Prefix sums of the centered series
    pub fn sums(&self) -> &CumulativeSums {
        &self.sums
    }

    /// Resolved priors
    pub fn priors(&self) -> &ModelPriors {
        &self.priors
    }

    /// Sample mean of the returns
    pub fn empirical_mean(&self) -> f64 {
        self.empirical_mean
    }

    /// Sample standard deviation of the returns
    pub fn empirical_sd(&self) -> f64 {
        self.empirical_sd
    }

    /// Admissible break indices
    pub fn tau_support(&self) -> RangeInclusive<usize> {
        self.priors.tau_lower..=self.priors.tau_upper
    }

    /// Log-likelihood of the observed returns under `state`
    pub fn log_likelihood(&self, state: &LatentState) -> f64 {
        let rss = self
            .sums
            .split_squared_deviations(state.tau, state.mu_before, state.mu_after);
        gaussian_log_likelihood(self.len(), rss, state.sigma)
    }

    /// Log-density of `state` under the priors
    pub fn log_prior(&self, state: &LatentState) -> f64 {
        self.priors.ln_tau(state.tau)
            + self.priors.ln_mu(state.mu_before)
            + self.priors.ln_mu(state.mu_after)
            + self.priors.ln_sigma(state.sigma)
    }

    /// Unnormalised log-posterior of `state`
    pub fn log_posterior(&self, state: &LatentState) -> f64 {
        let prior = self.log_prior(state);
        if prior == f64::NEG_INFINITY {
            return prior;
        }
        prior + self.log_likelihood(state)
    }

    /// Conditional log-weights of every admissible break index.
    ///
    /// `weights[k]` belongs to `tau = tau_lower + k`. Terms that do not depend
    /// on tau (the uniform prior, the normalising constant) are dropped.
    pub fn tau_log_weights(&self, mu_before: f64, mu_after: f64, sigma: f64, weights: &mut Vec<f64>) {
        weights.clear();
        let inv_two_var = 1.0 / (2.0 * sigma * sigma);
        for tau in self.tau_support() {
            let rss = self.sums.split_squared_deviations(tau, mu_before, mu_after);
            weights.push(-rss * inv_two_var);
        }
    }
}

/// Gaussian log-likelihood of `n` observations with residual sum of squares `rss`
#[inline]
pub fn gaussian_log_likelihood(n: usize, rss: f64, sigma: f64) -> f64 {
    let n = n as f64;
    -0.5 * n * (2.0 * PI).ln() - n * sigma.ln() - rss / (2.0 * sigma * sigma)
}
