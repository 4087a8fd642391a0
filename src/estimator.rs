//! Point estimate of the break: posterior mode of tau resolved to a date.

use crate::diagnostics::tau_histogram;
use crate::errors::{ChangePointError, EngineResult};
use crate::sampler::PosteriorSampleSet;
use crate::series::ReturnSeries;
use chrono::NaiveDate;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Most probable break index and its calendar date
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangePointEstimate {
    /// Posterior mode of tau, earliest index on ties
    pub tau_index: usize,
    /// Date of observation `tau_index`, the last "before" observation
    pub change_date: NaiveDate,
    /// Fraction of retained draws at the mode
    pub posterior_share: f64,
    /// Ascending `(tau, count)` pairs over every retained draw
    pub histogram: Vec<(usize, usize)>,
}

/// Posterior mode of tau across all chains.
///
/// Fails with `InsufficientDraws` when the set holds no draws.
pub fn estimate_change_point(
    samples: &PosteriorSampleSet,
    series: &ReturnSeries,
) -> EngineResult<ChangePointEstimate> {
    let taus = samples.tau_draws();
    let (tau_index, histogram) =
        tau_histogram(&taus).ok_or_else(|| ChangePointError::InsufficientDraws {
            operation: "estimate change point".to_string(),
            available: 0,
        })?;

    let change_date = series
        .date(tau_index)
        .ok_or_else(|| ChangePointError::NumericalError {
            reason: format!(
                "posterior mode {} outside series of length {}",
                tau_index,
                series.len()
            ),
        })?;

    let at_mode = histogram
        .iter()
        .find(|(t, _)| *t == tau_index)
        .map_or(0, |(_, c)| *c);
    let posterior_share = at_mode as f64 / taus.len() as f64;

    log::info!(
        "Change point at index {} ({}), posterior share {:.3}",
        tau_index,
        change_date,
        posterior_share
    );

    Ok(ChangePointEstimate {
        tau_index,
        change_date,
        posterior_share,
        histogram,
    })
}
