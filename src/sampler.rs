//! Multi-chain Metropolis-within-Gibbs sampler for the change-point posterior.
//!
//! Each iteration of a chain updates, in order:
//!
//! 1. `tau` by enumerating every admissible break index and drawing from the
//!    normalised conditional (log-sum-exp over the prefix-sum likelihoods);
//! 2. `mu_before` and `mu_after` from their conjugate Normal conditionals;
//! 3. `sigma` by random-walk Metropolis on `ln sigma`.
//!
//! Chains share only the read-only model. Each owns its random stream (seeded
//! from the base seed and its index) and its sample buffer, so the outcome for a
//! fixed seed does not depend on whether chains run on the rayon pool or in
//! sequence.

use crate::config::EngineConfig;
use crate::errors::{ChangePointError, EngineResult};
use crate::model::{gaussian_log_likelihood, ChangePointModel, LatentState};
use crate::secure_rng::{entropy_seed, ChainRng};
use rand::Rng;
use rand_distr::StandardNormal;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Target acceptance rate of the one-dimensional sigma proposal
pub const TARGET_SIGMA_ACCEPTANCE: f64 = 0.44;
/// Warm-up iterations between proposal-scale adjustments
pub const ADAPTATION_WINDOW: usize = 50;

const INITIAL_SIGMA_STEP: f64 = 0.1;
const MIN_SIGMA_STEP: f64 = 1e-4;
const MAX_SIGMA_STEP: f64 = 10.0;
const INITIAL_MU_JITTER: f64 = 0.1;

/// Shared flag that asks every running chain to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every chain stops at its next iteration
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scalar view of a latent variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parameter {
    /// Break index
    Tau,
    /// Mean log-return before the break
    MuBefore,
    /// Mean log-return after the break
    MuAfter,
    /// Shared volatility
    Sigma,
}

impl Parameter {
    /// Every parameter in summary order
    pub const ALL: [Parameter; 4] = [
        Parameter::Tau,
        Parameter::MuBefore,
        Parameter::MuAfter,
        Parameter::Sigma,
    ];

    /// Parameters that gate convergence
    pub const CONTINUOUS: [Parameter; 3] =
        [Parameter::MuBefore, Parameter::MuAfter, Parameter::Sigma];

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Tau => "tau",
            Parameter::MuBefore => "mu_before",
            Parameter::MuAfter => "mu_after",
            Parameter::Sigma => "sigma",
        }
    }

    /// Value of this parameter in `state`
    pub fn value(self, state: &LatentState) -> f64 {
        match self {
            Parameter::Tau => state.tau as f64,
            Parameter::MuBefore => state.mu_before,
            Parameter::MuAfter => state.mu_after,
            Parameter::Sigma => state.sigma,
        }
    }
}

/// One retained draw
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Draw {
    /// Latent state
    pub state: LatentState,
    /// Log-likelihood of the data under `state`
    pub log_likelihood: f64,
    /// Unnormalised log-posterior of `state`
    pub log_posterior: f64,
}

/// Retained draws and run metadata of one chain
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChainSamples {
    /// Chain index
    pub chain: usize,
    /// Seed of this chain's stream
    pub seed: u64,
    /// Discarded warm-up iterations
    pub warmup_iterations: usize,
    /// Keep-every-n factor after warm-up
    pub thinning_factor: usize,
    /// Sigma proposal scale frozen at the end of warm-up
    pub sigma_step: f64,
    /// Sigma acceptance rate after warm-up
    pub sigma_acceptance_rate: f64,
    /// Retained draws in iteration order
    pub draws: Vec<Draw>,
}

impl ChainSamples {
    /// Number of retained draws
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    /// Whether the chain retained nothing
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// Trace of `parameter` across retained draws
    pub fn trace(&self, parameter: Parameter) -> Vec<f64> {
        self.draws.iter().map(|d| parameter.value(&d.state)).collect()
    }
}

/// Draws of every chain from one sampling run
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PosteriorSampleSet {
    chains: Vec<ChainSamples>,
    base_seed: u64,
    budget_exhausted: bool,
}

impl PosteriorSampleSet {
    /// Assemble a set from completed chains
    pub fn new(chains: Vec<ChainSamples>, base_seed: u64) -> Self {
        Self {
            chains,
            base_seed,
            budget_exhausted: false,
        }
    }

    /// Set with no usable draws because the time budget ran out
    pub fn exhausted(base_seed: u64) -> Self {
        Self {
            chains: Vec::new(),
            base_seed,
            budget_exhausted: true,
        }
    }

    /// Per-chain samples
    pub fn chains(&self) -> &[ChainSamples] {
        &self.chains
    }

    /// Number of chains
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Base seed the chain streams were derived from
    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Whether sampling stopped on the time budget
    pub fn is_budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }

    /// Retained draws across all chains
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(ChainSamples::len).sum()
    }

    /// Whether no chain retained a draw
    pub fn is_empty(&self) -> bool {
        self.total_draws() == 0
    }

    /// Every retained draw, chain by chain
    pub fn draws(&self) -> impl Iterator<Item = &Draw> + '_ {
        self.chains.iter().flat_map(|c| c.draws.iter())
    }

    /// Every retained tau
    pub fn tau_draws(&self) -> Vec<usize> {
        self.draws().map(|d| d.state.tau).collect()
    }

    /// One trace of `parameter` per chain
    pub fn parameter_chains(&self, parameter: Parameter) -> Vec<Vec<f64>> {
        self.chains.iter().map(|c| c.trace(parameter)).collect()
    }
}

/// Why a chain stopped before retaining all its draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStop {
    /// The cancellation token was set
    Cancelled {
        /// Iteration at which the chain noticed
        iteration: usize,
    },
    /// The wall-clock budget elapsed
    BudgetExhausted {
        /// Iteration at which the chain noticed
        iteration: usize,
    },
}

/// Runs chains against a built model
#[derive(Debug, Clone)]
pub struct PosteriorSampler {
    chain_count: usize,
    draws_per_chain: usize,
    warmup_iterations: usize,
    thinning_factor: usize,
    seed: Option<u64>,
    time_budget: Option<Duration>,
}

impl PosteriorSampler {
    /// Sampler with the chain layout of `config`
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            chain_count: config.chain_count,
            draws_per_chain: config.draws_per_chain,
            warmup_iterations: config.warmup_iterations(),
            thinning_factor: config.thinning_factor.max(1),
            seed: config.seed,
            time_budget: config.time_budget,
        }
    }

    /// Run every chain and gather the retained draws.
    ///
    /// Fails with `SamplingCancelled` if `token` is set while chains run. An
    /// elapsed time budget yields an empty set flagged `budget_exhausted`.
    pub fn sample(
        &self,
        model: &ChangePointModel,
        token: &CancellationToken,
    ) -> EngineResult<PosteriorSampleSet> {
        let base_seed = self.seed.unwrap_or_else(entropy_seed);
        let deadline = self.time_budget.map(|budget| Instant::now() + budget);

        log::info!(
            "Sampling {} chains x {} draws ({} warm-up, thin {}), base seed {}",
            self.chain_count,
            self.draws_per_chain,
            self.warmup_iterations,
            self.thinning_factor,
            base_seed
        );

        let outcomes: Vec<Result<ChainSamples, ChainStop>> = {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;

                (0..self.chain_count)
                    .into_par_iter()
                    .map(|chain| self.run_chain(model, chain, base_seed, token, deadline))
                    .collect()
            }

            #[cfg(not(feature = "parallel"))]
            {
                (0..self.chain_count)
                    .map(|chain| self.run_chain(model, chain, base_seed, token, deadline))
                    .collect()
            }
        };

        let mut chains = Vec::with_capacity(outcomes.len());
        let mut exhausted = false;
        for (chain, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(samples) => chains.push(samples),
                Err(ChainStop::Cancelled { iteration }) => {
                    log::info!("Chain {} cancelled at iteration {}", chain, iteration);
                    return Err(ChangePointError::SamplingCancelled { chain, iteration });
                }
                Err(ChainStop::BudgetExhausted { .. }) => exhausted = true,
            }
        }

        if exhausted {
            log::warn!(
                "Sampling time budget of {:?} exhausted; all draws discarded",
                self.time_budget.unwrap_or_default()
            );
            return Ok(PosteriorSampleSet::exhausted(base_seed));
        }

        Ok(PosteriorSampleSet::new(chains, base_seed))
    }

    /// Run a single chain to completion.
    ///
    /// The stream is derived from `(base_seed, chain)` only. The buffer is
    /// dropped when the chain stops early.
    pub fn run_chain(
        &self,
        model: &ChangePointModel,
        chain: usize,
        base_seed: u64,
        token: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<ChainSamples, ChainStop> {
        let mut rng = ChainRng::for_chain(base_seed, chain);
        let mut state = initial_state(model, &mut rng);
        let mut tau_weights = Vec::with_capacity(model.len());
        let mut sigma_step = INITIAL_SIGMA_STEP;

        let total = self.warmup_iterations + self.draws_per_chain * self.thinning_factor;
        let mut draws = Vec::with_capacity(self.draws_per_chain);
        let mut window_accepted = 0usize;
        let mut retained_accepted = 0usize;
        let mut retained_proposals = 0usize;

        for iteration in 0..total {
            if token.is_cancelled() {
                return Err(ChainStop::Cancelled { iteration });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ChainStop::BudgetExhausted { iteration });
            }

            state.tau = draw_tau(model, &state, &mut tau_weights, &mut rng);
            state.mu_before = draw_segment_mean(model, state.tau, true, state.sigma, &mut rng);
            state.mu_after = draw_segment_mean(model, state.tau, false, state.sigma, &mut rng);
            let accepted = step_sigma(model, &mut state, sigma_step, &mut rng);

            if iteration < self.warmup_iterations {
                if accepted {
                    window_accepted += 1;
                }
                if (iteration + 1) % ADAPTATION_WINDOW == 0 {
                    let rate = window_accepted as f64 / ADAPTATION_WINDOW as f64;
                    sigma_step = (sigma_step * (rate - TARGET_SIGMA_ACCEPTANCE).exp())
                        .clamp(MIN_SIGMA_STEP, MAX_SIGMA_STEP);
                    window_accepted = 0;
                }
                continue;
            }

            retained_proposals += 1;
            if accepted {
                retained_accepted += 1;
            }
            let post_warmup = iteration - self.warmup_iterations;
            if (post_warmup + 1) % self.thinning_factor == 0 {
                let log_likelihood = model.log_likelihood(&state);
                draws.push(Draw {
                    state,
                    log_likelihood,
                    log_posterior: log_likelihood + model.log_prior(&state),
                });
            }
        }

        let sigma_acceptance_rate = if retained_proposals > 0 {
            retained_accepted as f64 / retained_proposals as f64
        } else {
            0.0
        };

        log::debug!(
            "Chain {} done: {} draws, sigma step {:.4}, acceptance {:.3}",
            chain,
            draws.len(),
            sigma_step,
            sigma_acceptance_rate
        );

        Ok(ChainSamples {
            chain,
            seed: rng.seed(),
            warmup_iterations: self.warmup_iterations,
            thinning_factor: self.thinning_factor,
            sigma_step,
            sigma_acceptance_rate,
            draws,
        })
    }
}

fn standard_normal(rng: &mut ChainRng) -> f64 {
    rng.sample(StandardNormal)
}

fn initial_state(model: &ChangePointModel, rng: &mut ChainRng) -> LatentState {
    let priors = model.priors();
    let support = model.tau_support();
    let jitter = priors.mu_sd * INITIAL_MU_JITTER;
    LatentState {
        tau: rng.gen_range(support),
        mu_before: priors.mu_mean + jitter * standard_normal(rng),
        mu_after: priors.mu_mean + jitter * standard_normal(rng),
        sigma: model.empirical_sd(),
    }
}

/// Categorical draw of tau from its enumerated conditional
fn draw_tau(
    model: &ChangePointModel,
    state: &LatentState,
    weights: &mut Vec<f64>,
    rng: &mut ChainRng,
) -> usize {
    model.tau_log_weights(state.mu_before, state.mu_after, state.sigma, weights);
    let lower = model.priors().tau_lower;

    let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return state.tau;
    }
    let mut total = 0.0;
    for w in weights.iter_mut() {
        *w = (*w - max).exp();
        total += *w;
    }

    let mut target = rng.gen::<f64>() * total;
    for (k, &w) in weights.iter().enumerate() {
        if target < w {
            return lower + k;
        }
        target -= w;
    }
    // Rounding can leave target marginally above the last weight
    lower + weights.len() - 1
}

/// Conjugate Normal draw of one regime mean; an empty segment draws from the prior
fn draw_segment_mean(
    model: &ChangePointModel,
    tau: usize,
    before: bool,
    sigma: f64,
    rng: &mut ChainRng,
) -> f64 {
    let sums = model.sums();
    let segment = if before { sums.before(tau) } else { sums.after(tau) };
    let priors = model.priors();

    let n = segment.count as f64;
    let raw_sum = segment.sum + n * sums.center();
    let prior_precision = 1.0 / (priors.mu_sd * priors.mu_sd);
    let data_precision = n / (sigma * sigma);
    let precision = prior_precision + data_precision;
    let mean = (priors.mu_mean * prior_precision + raw_sum / (sigma * sigma)) / precision;

    mean + standard_normal(rng) / precision.sqrt()
}

/// Log-scale random-walk Metropolis step for sigma; returns whether it moved
fn step_sigma(
    model: &ChangePointModel,
    state: &mut LatentState,
    step: f64,
    rng: &mut ChainRng,
) -> bool {
    let n = model.len();
    let rss = model
        .sums()
        .split_squared_deviations(state.tau, state.mu_before, state.mu_after);
    let priors = model.priors();
    // Target on the log scale includes the Jacobian term ln(sigma)
    let log_target = |sigma: f64| {
        priors.ln_sigma(sigma) + gaussian_log_likelihood(n, rss, sigma) + sigma.ln()
    };

    let proposal = state.sigma * (step * standard_normal(rng)).exp();
    if !(proposal.is_finite() && proposal > 0.0) {
        return false;
    }
    let log_ratio = log_target(proposal) - log_target(state.sigma);
    if log_ratio >= 0.0 || rng.gen::<f64>().ln() < log_ratio {
        state.sigma = proposal;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::ReturnSeries;
    use chrono::NaiveDate;

    fn shifted_model(config: &EngineConfig) -> ChangePointModel {
        let start = NaiveDate::from_ymd_opt(2019, 6, 1).unwrap();
        let values: Vec<f64> = (0..60)
            .map(|i| if i < 30 { 0.0 } else { 1.0 } + if i % 2 == 0 { 0.2 } else { -0.2 })
            .collect();
        let dates = (0..60).map(|i| start + chrono::Duration::days(i)).collect();
        let series = Arc::new(ReturnSeries::new(dates, values).unwrap());
        ChangePointModel::build(series, config).unwrap()
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            chain_count: 2,
            draws_per_chain: 200,
            warmup_fraction: 1.0,
            ..EngineConfig::standard()
        }
        .with_seed(11)
    }

    #[test]
    fn test_sample_shapes_and_metadata() {
        let config = EngineConfig {
            thinning_factor: 3,
            ..small_config()
        };
        let model = shifted_model(&config);
        let set = PosteriorSampler::new(&config)
            .sample(&model, &CancellationToken::new())
            .unwrap();

        assert_eq!(set.chain_count(), 2);
        assert_eq!(set.total_draws(), 400);
        assert_eq!(set.base_seed(), 11);
        assert!(!set.is_budget_exhausted());
        for (i, chain) in set.chains().iter().enumerate() {
            assert_eq!(chain.chain, i);
            assert_eq!(chain.len(), 200);
            assert_eq!(chain.warmup_iterations, 200);
            assert_eq!(chain.thinning_factor, 3);
            assert!(chain.sigma_step > 0.0);
            assert!((0.0..=1.0).contains(&chain.sigma_acceptance_rate));
        }
        assert_ne!(set.chains()[0].seed, set.chains()[1].seed);
    }

    #[test]
    fn test_draws_are_valid_states() {
        let config = small_config();
        let model = shifted_model(&config);
        let set = PosteriorSampler::new(&config)
            .sample(&model, &CancellationToken::new())
            .unwrap();

        for draw in set.draws() {
            assert!(model.tau_support().contains(&draw.state.tau));
            assert!(draw.state.sigma > 0.0);
            assert!(draw.log_likelihood.is_finite());
            assert!(draw.log_posterior.is_finite());
        }
    }

    #[test]
    fn test_recovers_clear_break() {
        let config = small_config();
        let model = shifted_model(&config);
        let set = PosteriorSampler::new(&config)
            .sample(&model, &CancellationToken::new())
            .unwrap();

        let taus = set.tau_draws();
        let at_break = taus.iter().filter(|&&t| t == 29).count();
        assert!(at_break as f64 / taus.len() as f64 > 0.9);
    }

    #[test]
    fn test_same_seed_same_draws() {
        let config = small_config();
        let model = shifted_model(&config);
        let sampler = PosteriorSampler::new(&config);
        let a = sampler.sample(&model, &CancellationToken::new()).unwrap();
        let b = sampler.sample(&model, &CancellationToken::new()).unwrap();
        for (ca, cb) in a.chains().iter().zip(b.chains()) {
            assert_eq!(ca.draws, cb.draws);
        }
    }

    #[test]
    fn test_cancelled_token_fails_sampling() {
        let config = small_config();
        let model = shifted_model(&config);
        let token = CancellationToken::new();
        token.cancel();

        let err = PosteriorSampler::new(&config).sample(&model, &token).unwrap_err();
        assert!(matches!(
            err,
            ChangePointError::SamplingCancelled { chain: 0, iteration: 0 }
        ));
    }

    #[test]
    fn test_elapsed_budget_yields_empty_set() {
        let config = EngineConfig {
            time_budget: Some(Duration::ZERO),
            ..small_config()
        };
        let model = shifted_model(&config);
        let set = PosteriorSampler::new(&config)
            .sample(&model, &CancellationToken::new())
            .unwrap();
        assert!(set.is_budget_exhausted());
        assert!(set.is_empty());
    }
}
