//! # Convergence Diagnostics
//!
//! Decides whether the chains of a [`PosteriorSampleSet`] can be trusted.
//!
//! ## Continuous parameters
//! - **Split R-hat**: every chain is halved and the BDA3 potential scale
//!   reduction factor is computed over the halves, so a single chain that
//!   drifts is caught as well as chains that disagree.
//! - **ESS**: multi-chain effective sample size from the combined
//!   autocorrelation, truncated with Geyer's initial positive sequence.
//!
//! ## Break index
//! tau is discrete, so R-hat is reported for information only. Its
//! concentration is summarised by the modal share and the Shannon entropy of
//! the empirical posterior, normalised by the log of the support size.
//!
//! Non-convergence is a status on the report, never an error.

use crate::config::EngineConfig;
use crate::errors::{ChangePointError, EngineResult};
use crate::math_utils::{autocovariances, float_total_cmp, highest_density_interval, mean, sample_variance};
use crate::sampler::{Parameter, PosteriorSampleSet};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fewest draws per chain for which the diagnostics mean anything
pub const MIN_DRAWS_PER_CHAIN: usize = 20;
/// Probability mass of the reported highest-density interval
pub const HDI_PROBABILITY: f64 = 0.94;

/// Overall verdict of the diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConvergenceStatus {
    /// Every gate passed
    Converged,
    /// At least one gate failed; estimates are low-confidence
    NotConverged,
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceStatus::Converged => write!(f, "CONVERGED"),
            ConvergenceStatus::NotConverged => write!(f, "NOT_CONVERGED"),
        }
    }
}

/// One row of the posterior summary table
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSummary {
    /// Summarised parameter
    pub parameter: Parameter,
    /// Posterior mean
    pub mean: f64,
    /// Posterior standard deviation
    pub sd: f64,
    /// Lower bound of the 94% HDI
    pub hdi_lower: f64,
    /// Upper bound of the 94% HDI
    pub hdi_upper: f64,
    /// Multi-chain effective sample size
    pub ess: f64,
    /// Split R-hat
    pub rhat: f64,
}

/// Concentration of the empirical tau posterior
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TauConcentration {
    /// Most frequent index, earliest on ties
    pub mode: usize,
    /// Fraction of draws at the mode
    pub modal_share: f64,
    /// Shannon entropy divided by ln(support size); 0 is a point mass, 1 uniform
    pub normalized_entropy: f64,
    /// Number of admissible indices
    pub support_size: usize,
}

/// Outcome of the convergence diagnostics
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvergenceReport {
    /// Overall verdict
    pub status: ConvergenceStatus,
    /// Summary rows in `Parameter::ALL` order (empty when there are no draws)
    pub summaries: Vec<ParameterSummary>,
    /// tau concentration, when there are draws
    pub tau: Option<TauConcentration>,
    /// Number of chains diagnosed
    pub chain_count: usize,
    /// Retained draws across all chains
    pub total_draws: usize,
    /// ESS every continuous parameter must reach
    pub min_ess_required: f64,
    /// R-hat every continuous parameter must stay under
    pub rhat_threshold: f64,
    /// Human-readable reasons for a NOT_CONVERGED verdict
    pub issues: Vec<String>,
}

impl ConvergenceReport {
    /// Whether every gate passed
    pub fn is_converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }

    /// Summary row of `parameter`
    pub fn summary(&self, parameter: Parameter) -> Option<&ParameterSummary> {
        self.summaries.iter().find(|s| s.parameter == parameter)
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} chains, {} draws)",
            self.status, self.chain_count, self.total_draws
        )?;
        writeln!(
            f,
            "{:<10} {:>12} {:>12} {:>12} {:>12} {:>9} {:>7}",
            "", "mean", "sd", "hdi_3%", "hdi_97%", "ess", "r_hat"
        )?;
        for s in &self.summaries {
            writeln!(
                f,
                "{:<10} {:>12.6} {:>12.6} {:>12.6} {:>12.6} {:>9.1} {:>7.3}",
                s.parameter.name(),
                s.mean,
                s.sd,
                s.hdi_lower,
                s.hdi_upper,
                s.ess,
                s.rhat
            )?;
        }
        for issue in &self.issues {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

/// Run every diagnostic over `samples`.
///
/// `tau_support_size` is the number of admissible break indices. Fails only
/// with `IncompleteChains` when chains hold different numbers of draws.
pub fn diagnose(
    samples: &PosteriorSampleSet,
    config: &EngineConfig,
    tau_support_size: usize,
) -> EngineResult<ConvergenceReport> {
    let chains = samples.chains();
    if let Some(first) = chains.first() {
        let expected = first.len();
        if let Some(bad) = chains.iter().find(|c| c.len() != expected) {
            return Err(ChangePointError::IncompleteChains {
                expected,
                chain: bad.chain,
                actual: bad.len(),
            });
        }
    }

    let total_draws = samples.total_draws();
    let min_ess_required = config.min_ess_fraction * total_draws as f64;
    let mut report = ConvergenceReport {
        status: ConvergenceStatus::NotConverged,
        summaries: Vec::new(),
        tau: None,
        chain_count: chains.len(),
        total_draws,
        min_ess_required,
        rhat_threshold: config.rhat_threshold,
        issues: Vec::new(),
    };

    if total_draws == 0 {
        report.issues.push(if samples.is_budget_exhausted() {
            "time budget exhausted before any draw was retained".to_string()
        } else {
            "sample set holds no draws".to_string()
        });
        log::warn!("Diagnostics: {}", report.issues[0]);
        return Ok(report);
    }

    let per_chain = chains[0].len();
    if per_chain < MIN_DRAWS_PER_CHAIN {
        report.issues.push(format!(
            "{} draws per chain, at least {} required",
            per_chain, MIN_DRAWS_PER_CHAIN
        ));
    }

    for parameter in Parameter::ALL {
        let traces = samples.parameter_chains(parameter);
        let summary = summarize(parameter, &traces);
        if parameter != Parameter::Tau {
            if summary.rhat.is_nan() || summary.rhat >= config.rhat_threshold {
                report.issues.push(format!(
                    "{}: R-hat {:.4} not below {}",
                    parameter.name(),
                    summary.rhat,
                    config.rhat_threshold
                ));
            }
            if summary.ess.is_nan() || summary.ess < min_ess_required {
                report.issues.push(format!(
                    "{}: ESS {:.1} below {:.1}",
                    parameter.name(),
                    summary.ess,
                    min_ess_required
                ));
            }
        }
        report.summaries.push(summary);
    }

    report.tau = tau_concentration(&samples.tau_draws(), tau_support_size);

    if report.issues.is_empty() {
        report.status = ConvergenceStatus::Converged;
        log::info!(
            "Diagnostics: CONVERGED over {} chains x {} draws",
            report.chain_count,
            per_chain
        );
    } else {
        log::warn!(
            "Diagnostics: NOT_CONVERGED ({})",
            report.issues.join("; ")
        );
    }
    Ok(report)
}

/// Summary row for one parameter given one trace per chain
pub fn summarize(parameter: Parameter, traces: &[Vec<f64>]) -> ParameterSummary {
    let mut pooled: Vec<f64> = traces.iter().flatten().copied().collect();
    let mean = mean(&pooled);
    let sd = sample_variance(&pooled).sqrt();
    pooled.sort_by(float_total_cmp);
    let (hdi_lower, hdi_upper) = highest_density_interval(&pooled, HDI_PROBABILITY);

    ParameterSummary {
        parameter,
        mean,
        sd,
        hdi_lower,
        hdi_upper,
        ess: effective_sample_size(traces),
        rhat: split_rhat(traces),
    }
}

/// Split-chain potential scale reduction factor.
///
/// Each chain is cut into two halves (the middle draw of an odd-length chain is
/// dropped). Returns infinity when a half holds fewer than two draws, and 1 when
/// every half is constant at the same value.
pub fn split_rhat(traces: &[Vec<f64>]) -> f64 {
    let halves: Vec<&[f64]> = traces
        .iter()
        .flat_map(|t| {
            let half = t.len() / 2;
            [&t[..half], &t[t.len() - half..]]
        })
        .collect();

    let n = halves.iter().map(|h| h.len()).min().unwrap_or(0);
    if halves.len() < 2 || n < 2 {
        return f64::INFINITY;
    }

    let means: Vec<f64> = halves.iter().map(|h| mean(&h[..n])).collect();
    let within = mean(&halves.iter().map(|h| sample_variance(&h[..n])).collect::<Vec<_>>());
    let between = n as f64 * sample_variance(&means);

    if within <= 0.0 {
        return if between <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    let n = n as f64;
    let var_plus = (n - 1.0) / n * within + between / n;
    (var_plus / within).sqrt()
}

/// Multi-chain effective sample size with Geyer's initial positive sequence.
///
/// Chains must have equal length. Returns the draw count for a constant
/// trace.
pub fn effective_sample_size(traces: &[Vec<f64>]) -> f64 {
    let m = traces.len();
    let n = traces.iter().map(Vec::len).min().unwrap_or(0);
    if m == 0 || n == 0 {
        return 0.0;
    }
    let total = (m * n) as f64;
    if n < 4 {
        return total;
    }

    let nf = n as f64;
    let chain_means: Vec<f64> = traces.iter().map(|t| mean(&t[..n])).collect();
    let acovs: Vec<Vec<f64>> = traces
        .iter()
        .zip(&chain_means)
        .map(|(t, &mu)| autocovariances(&t[..n], mu, n - 1))
        .collect();

    let mean_acov = |lag: usize| acovs.iter().map(|a| a[lag]).sum::<f64>() / m as f64;
    let within = mean_acov(0) * nf / (nf - 1.0);
    let between = if m > 1 { sample_variance(&chain_means) } else { 0.0 };
    let var_plus = within * (nf - 1.0) / nf + between;
    if var_plus <= 0.0 {
        return total;
    }
    let rho = |lag: usize| 1.0 - (within - mean_acov(lag)) / var_plus;

    // Sum consecutive pairs while positive, forcing them non-increasing
    let mut tau_hat = -1.0;
    let mut previous_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(previous_pair);
        tau_hat += 2.0 * pair;
        previous_pair = pair;
        lag += 2;
    }

    let tau_hat = tau_hat.max(1.0 / total.log10().max(1.0));
    (total / tau_hat).min(total * total.log10().max(1.0))
}

/// Modal share and normalised entropy of a tau sample
pub fn tau_concentration(taus: &[usize], support_size: usize) -> Option<TauConcentration> {
    let (mode, counts) = tau_histogram(taus)?;
    let total = taus.len() as f64;
    let modal_share = counts.iter().find(|(t, _)| *t == mode).map_or(0.0, |(_, c)| *c as f64 / total);

    let entropy: f64 = counts
        .iter()
        .map(|&(_, c)| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();
    let normalized_entropy = if support_size > 1 {
        (entropy / (support_size as f64).ln()).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(TauConcentration {
        mode,
        modal_share,
        normalized_entropy,
        support_size,
    })
}

/// Mode (earliest on ties) and ascending `(tau, count)` histogram
pub fn tau_histogram(taus: &[usize]) -> Option<(usize, Vec<(usize, usize)>)> {
    if taus.is_empty() {
        return None;
    }
    let mut sorted = taus.to_vec();
    sorted.sort_unstable();

    let mut counts: Vec<(usize, usize)> = Vec::new();
    for tau in sorted {
        match counts.last_mut() {
            Some((t, c)) if *t == tau => *c += 1,
            _ => counts.push((tau, 1)),
        }
    }

    // Ascending scan with strict comparison keeps the earliest index on ties
    let mut mode = counts[0];
    for &entry in &counts[1..] {
        if entry.1 > mode.1 {
            mode = entry;
        }
    }
    Some((mode.0, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LatentState;
    use crate::sampler::{ChainSamples, Draw};
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, Normal};

    fn iid_traces(chains: usize, n: usize, shift: f64) -> Vec<Vec<f64>> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..chains)
            .map(|c| {
                let mut rng = ChaCha20Rng::seed_from_u64(100 + c as u64);
                (0..n)
                    .map(|_| normal.sample(&mut rng) + if c == 0 { shift } else { 0.0 })
                    .collect()
            })
            .collect()
    }

    fn chain(index: usize, taus: &[usize]) -> ChainSamples {
        let draws = taus
            .iter()
            .enumerate()
            .map(|(i, &tau)| Draw {
                state: LatentState {
                    tau,
                    mu_before: (i as f64 * 0.7).sin(),
                    mu_after: (i as f64 * 1.3).cos(),
                    sigma: 1.0 + (i as f64 * 0.4).sin().abs(),
                },
                log_likelihood: 0.0,
                log_posterior: 0.0,
            })
            .collect();
        ChainSamples {
            chain: index,
            seed: index as u64,
            warmup_iterations: 0,
            thinning_factor: 1,
            sigma_step: 0.1,
            sigma_acceptance_rate: 0.4,
            draws,
        }
    }

    fn chain_with_mu_before(index: usize, trace: &[f64]) -> ChainSamples {
        let mut samples = chain(index, &vec![1; trace.len()]);
        for (draw, &value) in samples.draws.iter_mut().zip(trace) {
            draw.state.mu_before = value;
        }
        samples
    }

    fn has_issue(report: &ConvergenceReport, prefix: &str) -> bool {
        report.issues.iter().any(|i| i.starts_with(prefix))
    }

    #[test]
    fn test_diagnose_fails_rhat_gate() {
        let traces = iid_traces(2, 500, 3.0);
        let set = PosteriorSampleSet::new(
            vec![chain_with_mu_before(0, &traces[0]), chain_with_mu_before(1, &traces[1])],
            0,
        );
        let report = diagnose(&set, &EngineConfig::default(), 10).unwrap();

        assert_eq!(report.status, ConvergenceStatus::NotConverged);
        assert!(has_issue(&report, "mu_before: R-hat"), "{:?}", report.issues);
        assert!(report.summary(Parameter::MuBefore).unwrap().rhat >= report.rhat_threshold);
    }

    #[test]
    fn test_diagnose_passes_rhat_gate_for_agreeing_chains() {
        let traces = iid_traces(2, 500, 0.0);
        let set = PosteriorSampleSet::new(
            vec![chain_with_mu_before(0, &traces[0]), chain_with_mu_before(1, &traces[1])],
            0,
        );
        let report = diagnose(&set, &EngineConfig::default(), 10).unwrap();

        assert!(!has_issue(&report, "mu_before: R-hat"), "{:?}", report.issues);
        assert!(!has_issue(&report, "mu_before: ESS"), "{:?}", report.issues);
    }

    #[test]
    fn test_diagnose_fails_ess_gate_with_good_rhat() {
        // Both chains trace the same slow wave: halves agree but draws are highly correlated
        let wave: Vec<f64> = (0..400)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / 100.0).sin())
            .collect();
        let set = PosteriorSampleSet::new(
            vec![chain_with_mu_before(0, &wave), chain_with_mu_before(1, &wave)],
            0,
        );
        let report = diagnose(&set, &EngineConfig::default(), 10).unwrap();
        let summary = report.summary(Parameter::MuBefore).unwrap();

        assert_eq!(report.status, ConvergenceStatus::NotConverged);
        assert!(summary.rhat < report.rhat_threshold, "rhat = {}", summary.rhat);
        assert!(summary.ess < report.min_ess_required, "ess = {}", summary.ess);
        assert!(has_issue(&report, "mu_before: ESS"), "{:?}", report.issues);
        assert!(!has_issue(&report, "mu_before: R-hat"), "{:?}", report.issues);
    }

    #[test]
    fn test_rhat_near_one_for_iid_chains() {
        let rhat = split_rhat(&iid_traces(4, 1000, 0.0));
        assert!(rhat < 1.01, "rhat = {}", rhat);
    }

    #[test]
    fn test_rhat_flags_disagreeing_chain() {
        let rhat = split_rhat(&iid_traces(4, 500, 3.0));
        assert!(rhat > 1.1, "rhat = {}", rhat);
    }

    #[test]
    fn test_rhat_flags_trending_single_chain() {
        let trace: Vec<f64> = (0..200).map(|i| i as f64).collect();
        assert!(split_rhat(&[trace]) > 1.5);
    }

    #[test]
    fn test_ess_iid_close_to_draw_count() {
        let ess = effective_sample_size(&iid_traces(4, 1000, 0.0));
        assert!(ess > 2500.0 && ess < 6000.0, "ess = {}", ess);
    }

    #[test]
    fn test_ess_small_for_sticky_chain() {
        // AR(1) with phi = 0.95 has ESS ~ n (1 - phi) / (1 + phi)
        let normal = Normal::new(0.0, 1.0).unwrap();
        let traces: Vec<Vec<f64>> = (0..2)
            .map(|c| {
                let mut rng = ChaCha20Rng::seed_from_u64(7 + c);
                let mut x = 0.0;
                (0..2000)
                    .map(|_| {
                        x = 0.95 * x + normal.sample(&mut rng);
                        x
                    })
                    .collect()
            })
            .collect();
        let ess = effective_sample_size(&traces);
        assert!(ess < 400.0, "ess = {}", ess);
    }

    #[test]
    fn test_tau_histogram_mode_ties_to_earliest() {
        let (mode, counts) = tau_histogram(&[7, 3, 7, 3, 9]).unwrap();
        assert_eq!(mode, 3);
        assert_eq!(counts, vec![(3, 2), (7, 2), (9, 1)]);
        assert!(tau_histogram(&[]).is_none());
    }

    #[test]
    fn test_tau_concentration_extremes() {
        let point = tau_concentration(&[4; 50], 10).unwrap();
        assert_approx_eq!(point.modal_share, 1.0, 1e-12);
        assert_approx_eq!(point.normalized_entropy, 0.0, 1e-12);

        let spread: Vec<usize> = (0..100).map(|i| i % 10).collect();
        let uniform = tau_concentration(&spread, 10).unwrap();
        assert_approx_eq!(uniform.modal_share, 0.1, 1e-12);
        assert_approx_eq!(uniform.normalized_entropy, 1.0, 1e-9);
    }

    #[test]
    fn test_unequal_chains_are_an_error() {
        let set = PosteriorSampleSet::new(vec![chain(0, &[1; 30]), chain(1, &[1; 25])], 0);
        let err = diagnose(&set, &EngineConfig::default(), 10).unwrap_err();
        assert!(matches!(
            err,
            ChangePointError::IncompleteChains { expected: 30, chain: 1, actual: 25 }
        ));
    }

    #[test]
    fn test_too_few_draws_not_converged() {
        let set = PosteriorSampleSet::new(vec![chain(0, &[2, 2, 3, 2, 2])], 0);
        let report = diagnose(&set, &EngineConfig::default(), 10).unwrap();
        assert_eq!(report.status, ConvergenceStatus::NotConverged);
        assert!(report.issues.iter().any(|i| i.contains("draws per chain")));
        assert_eq!(report.summaries.len(), 4);
    }

    #[test]
    fn test_empty_set_not_converged() {
        let report = diagnose(&PosteriorSampleSet::exhausted(1), &EngineConfig::default(), 10).unwrap();
        assert!(!report.is_converged());
        assert!(report.summaries.is_empty());
        assert!(report.tau.is_none());
        assert!(report.issues[0].contains("budget"));
    }
}
