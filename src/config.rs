//! # Engine Configuration
//!
//! Every tunable of the change-point engine lives in [`EngineConfig`], passed
//! once when the engine is constructed. Presets trade runtime for precision in
//! the same way across all fields.

use crate::errors::{validate_parameter, ChangePointError, EngineResult};
use crate::events::AssociationPolicy;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default R-hat ceiling below which a continuous parameter counts as mixed
pub const DEFAULT_RHAT_THRESHOLD: f64 = 1.05;
/// Default minimum ESS as a fraction of the nominal retained draws
pub const DEFAULT_MIN_ESS_FRACTION: f64 = 0.10;

/// Configuration for the change-point engine
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Number of independent chains (parallelism/mixing trade-off)
    pub chain_count: usize,
    /// Retained draws per chain (precision vs. runtime)
    pub draws_per_chain: usize,
    /// Warm-up length as a fraction of `draws_per_chain` (bias vs. runtime)
    pub warmup_fraction: f64,
    /// Keep every n-th post-warm-up iteration (runtime vs. resolution)
    pub thinning_factor: usize,
    /// Prior sd of both regime means in units of the empirical sd
    /// (informativeness vs. convergence speed)
    pub prior_width: f64,
    /// Half-normal scale of sigma in units of the empirical sd
    pub sigma_prior_factor: f64,
    /// Support of the break index as fractions of the series length
    pub tau_window: (f64, f64),
    /// Base seed for the chain streams; `None` draws one from OS entropy
    pub seed: Option<u64>,
    /// R-hat ceiling for convergence
    pub rhat_threshold: f64,
    /// Minimum ESS as a fraction of total retained draws
    pub min_ess_fraction: f64,
    /// Optional wall-clock budget for the whole sampling stage
    #[cfg_attr(feature = "serde", serde(skip))]
    pub time_budget: Option<Duration>,
    /// How the detected date is matched against the event catalog
    pub association_policy: AssociationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl EngineConfig {
    /// Quick configuration: short chains for smoke tests and exploration
    pub fn quick() -> Self {
        Self {
            chain_count: 2,
            draws_per_chain: 300,
            warmup_fraction: 1.0,
            thinning_factor: 1,
            ..Self::standard()
        }
    }

    /// Standard configuration: 4 chains of 1000 draws after 1000 warm-up iterations
    pub fn standard() -> Self {
        Self {
            chain_count: 4,
            draws_per_chain: 1000,
            warmup_fraction: 1.0,
            thinning_factor: 1,
            prior_width: 1.0,
            sigma_prior_factor: 5.0,
            tau_window: (0.0, 1.0),
            seed: None,
            rhat_threshold: DEFAULT_RHAT_THRESHOLD,
            min_ess_fraction: DEFAULT_MIN_ESS_FRACTION,
            time_budget: None,
            association_policy: AssociationPolicy::Nearest,
        }
    }

    /// Thorough configuration: longer, thinned chains and a stricter R-hat
    pub fn thorough() -> Self {
        Self {
            chain_count: 6,
            draws_per_chain: 2000,
            warmup_fraction: 1.0,
            thinning_factor: 2,
            rhat_threshold: 1.01,
            ..Self::standard()
        }
    }

    /// Set the base seed for reproducible sampling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Restrict the break index to a fraction window of the series
    pub fn with_tau_window(mut self, lower: f64, upper: f64) -> Self {
        self.tau_window = (lower, upper);
        self
    }

    /// Number of warm-up iterations discarded at the start of each chain
    pub fn warmup_iterations(&self) -> usize {
        (self.warmup_fraction * self.draws_per_chain as f64).round() as usize
    }

    /// Total iterations each chain runs, warm-up included
    pub fn total_iterations(&self) -> usize {
        self.warmup_iterations() + self.draws_per_chain * self.thinning_factor
    }

    /// Check every field; the engine refuses a configuration that fails this
    pub fn validate(&self) -> EngineResult<()> {
        if self.chain_count < 2 {
            return Err(ChangePointError::Configuration {
                parameter: "chain_count".to_string(),
                value: self.chain_count.to_string(),
                constraint: "at least 2 independent chains".to_string(),
            });
        }
        if self.draws_per_chain == 0 {
            return Err(ChangePointError::Configuration {
                parameter: "draws_per_chain".to_string(),
                value: "0".to_string(),
                constraint: "at least 1 retained draw".to_string(),
            });
        }
        if self.thinning_factor == 0 {
            return Err(ChangePointError::Configuration {
                parameter: "thinning_factor".to_string(),
                value: "0".to_string(),
                constraint: "at least 1".to_string(),
            });
        }
        validate_parameter(self.warmup_fraction, 0.0, 10.0, "warmup_fraction")?;
        validate_parameter(self.prior_width, 1e-6, 1e6, "prior_width")?;
        validate_parameter(self.sigma_prior_factor, 1e-6, 1e6, "sigma_prior_factor")?;
        validate_parameter(self.rhat_threshold, 1.0, 2.0, "rhat_threshold")?;
        validate_parameter(self.min_ess_fraction, 0.0, 1.0, "min_ess_fraction")?;

        let (lower, upper) = self.tau_window;
        validate_parameter(lower, 0.0, 1.0, "tau_window.lower")?;
        validate_parameter(upper, 0.0, 1.0, "tau_window.upper")?;
        if lower >= upper {
            return Err(ChangePointError::Configuration {
                parameter: "tau_window".to_string(),
                value: format!("({}, {})", lower, upper),
                constraint: "lower < upper".to_string(),
            });
        }
        Ok(())
    }
}
