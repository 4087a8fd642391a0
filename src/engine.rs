//! # Change-Point Engine
//!
//! Orchestrates the analysis as a linear state machine:
//!
//! ```text
//! Unfit -> DataPrepared -> ModelBuilt -> Sampled -> Analyzed -> Estimated
//! ```
//!
//! Every operation requires its predecessor state or any later one. Re-running
//! an earlier stage discards everything downstream of it. A call made too early
//! fails with an error naming the missing state and leaves the engine as it
//! was, and so does a stage that fails part-way.

use crate::config::EngineConfig;
use crate::diagnostics::{self, ConvergenceReport};
use crate::errors::{ChangePointError, EngineResult};
use crate::estimator::estimate_change_point;
use crate::events::{associate_event, EventCatalog};
use crate::impact::quantify_impact;
use crate::model::ChangePointModel;
use crate::results::{ChangePointResult, Confidence};
use crate::sampler::{CancellationToken, PosteriorSampleSet, PosteriorSampler};
use crate::series::ReturnSeries;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a [`ChangePointEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EngineState {
    /// Nothing supplied yet
    Unfit,
    /// A validated series is held
    DataPrepared,
    /// Model built over the series
    ModelBuilt,
    /// Posterior draws available
    Sampled,
    /// Convergence diagnostics ran
    Analyzed,
    /// Result produced
    Estimated,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Unfit => "Unfit",
            EngineState::DataPrepared => "DataPrepared",
            EngineState::ModelBuilt => "ModelBuilt",
            EngineState::Sampled => "Sampled",
            EngineState::Analyzed => "Analyzed",
            EngineState::Estimated => "Estimated",
        };
        f.write_str(name)
    }
}

/// Bayesian single change-point engine
#[derive(Debug)]
pub struct ChangePointEngine {
    config: EngineConfig,
    state: EngineState,
    series: Option<Arc<ReturnSeries>>,
    model: Option<ChangePointModel>,
    samples: Option<PosteriorSampleSet>,
    report: Option<ConvergenceReport>,
    result: Option<ChangePointResult>,
}

impl ChangePointEngine {
    /// Create an engine; the configuration is validated once here.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: EngineState::Unfit,
            series: None,
            model: None,
            samples: None,
            report: None,
            result: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Configuration the engine runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepared series, if any
    pub fn series(&self) -> Option<&Arc<ReturnSeries>> {
        self.series.as_ref()
    }

    /// Built model, if any
    pub fn model(&self) -> Option<&ChangePointModel> {
        self.model.as_ref()
    }

    /// Raw posterior draws, if sampled
    pub fn samples(&self) -> Option<&PosteriorSampleSet> {
        self.samples.as_ref()
    }

    /// Diagnostics report, if analyzed
    pub fn report(&self) -> Option<&ConvergenceReport> {
        self.report.as_ref()
    }

    /// Final result, if estimated
    pub fn result(&self) -> Option<&ChangePointResult> {
        self.result.as_ref()
    }

    /// Hand the engine a series; allowed in any state.
    pub fn prepare(&mut self, series: impl Into<Arc<ReturnSeries>>) -> EngineResult<()> {
        let series = series.into();
        if series.is_empty() {
            return Err(ChangePointError::DataNotPrepared {
                operation: "prepare".to_string(),
                reason: "series is empty".to_string(),
                current: self.state,
            });
        }
        log::info!("Prepared series of {} observations", series.len());
        self.series = Some(series);
        self.model = None;
        self.clear_from(EngineState::ModelBuilt);
        self.state = EngineState::DataPrepared;
        Ok(())
    }

    /// Build the model over the prepared series.
    pub fn build_model(&mut self) -> EngineResult<()> {
        let series = match (&self.series, self.state >= EngineState::DataPrepared) {
            (Some(series), true) => Arc::clone(series),
            _ => {
                return Err(ChangePointError::DataNotPrepared {
                    operation: "build_model".to_string(),
                    reason: "no series has been prepared".to_string(),
                    current: self.state,
                })
            }
        };

        let model = ChangePointModel::build(series, &self.config)?;
        self.model = Some(model);
        self.clear_from(EngineState::ModelBuilt);
        self.state = EngineState::ModelBuilt;
        Ok(())
    }

    /// Draw posterior samples.
    pub fn sample(&mut self) -> EngineResult<()> {
        self.sample_with_cancellation(&CancellationToken::new())
    }

    /// Draw posterior samples, stopping early if `token` is cancelled.
    pub fn sample_with_cancellation(&mut self, token: &CancellationToken) -> EngineResult<()> {
        let model = self.require_model("sample")?;
        let samples = PosteriorSampler::new(&self.config).sample(model, token)?;
        log::info!(
            "Sampling finished: {} draws over {} chains",
            samples.total_draws(),
            samples.chain_count()
        );
        self.clear_from(EngineState::Sampled);
        self.samples = Some(samples);
        self.state = EngineState::Sampled;
        Ok(())
    }

    /// Run the convergence diagnostics over the current draws.
    pub fn diagnose(&mut self) -> EngineResult<&ConvergenceReport> {
        let samples = self.require_samples("diagnose")?;
        let support_size = match &self.model {
            Some(model) => {
                let support = model.tau_support();
                support.end() - support.start() + 1
            }
            None => 0,
        };
        let report = diagnostics::diagnose(samples, &self.config, support_size)?;

        self.result = None;
        self.state = EngineState::Analyzed;
        Ok(self.report.insert(report))
    }

    /// Extract the change point, quantify the shift and match an event.
    pub fn estimate(&mut self, catalog: Option<&EventCatalog>) -> EngineResult<ChangePointResult> {
        let samples = self.require_samples("estimate")?;
        let report = match (&self.report, self.state >= EngineState::Analyzed) {
            (Some(report), true) => report,
            _ => {
                return Err(ChangePointError::NotAnalyzed {
                    operation: "estimate".to_string(),
                    required: EngineState::Analyzed,
                    current: self.state,
                })
            }
        };
        let series = self.series.as_ref().ok_or_else(|| ChangePointError::DataNotPrepared {
            operation: "estimate".to_string(),
            reason: "series missing".to_string(),
            current: self.state,
        })?;

        let estimate = estimate_change_point(samples, series)?;
        let impact = quantify_impact(samples)?;
        let nearest_event =
            associate_event(estimate.change_date, catalog, self.config.association_policy);

        let confidence = if report.is_converged() {
            Confidence::High
        } else {
            log::warn!("Result produced from non-converged chains; confidence is low");
            Confidence::Low
        };

        let result = ChangePointResult {
            tau_index: estimate.tau_index,
            change_date: estimate.change_date,
            mean_return_before: impact.mean_before,
            mean_return_after: impact.mean_after,
            percentage_change: impact.percentage_change,
            implied_price_change: impact.implied_price_change,
            probability_increase: impact.probability_increase,
            tau_posterior_share: estimate.posterior_share,
            nearest_event,
            confidence,
        };

        self.result = Some(result.clone());
        self.state = EngineState::Estimated;
        Ok(result)
    }

    /// Run every stage on `series` in order.
    pub fn run(
        &mut self,
        series: impl Into<Arc<ReturnSeries>>,
        catalog: Option<&EventCatalog>,
    ) -> EngineResult<ChangePointResult> {
        self.prepare(series)?;
        self.build_model()?;
        self.sample()?;
        self.diagnose()?;
        self.estimate(catalog)
    }

    fn require_model(&self, operation: &str) -> EngineResult<&ChangePointModel> {
        match (&self.model, self.state >= EngineState::ModelBuilt) {
            (Some(model), true) => Ok(model),
            _ => Err(ChangePointError::ModelNotBuilt {
                operation: operation.to_string(),
                required: EngineState::ModelBuilt,
                current: self.state,
            }),
        }
    }

    fn require_samples(&self, operation: &str) -> EngineResult<&PosteriorSampleSet> {
        match (&self.samples, self.state >= EngineState::Sampled) {
            (Some(samples), true) => Ok(samples),
            _ => Err(ChangePointError::NotSampled {
                operation: operation.to_string(),
                required: EngineState::Sampled,
                current: self.state,
            }),
        }
    }

    /// Drop every artifact produced at or after `stage`
    fn clear_from(&mut self, stage: EngineState) {
        if stage <= EngineState::Sampled {
            self.samples = None;
        }
        if stage <= EngineState::Analyzed {
            self.report = None;
        }
        self.result = None;
    }
}
