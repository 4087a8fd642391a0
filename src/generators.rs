//! Synthetic log-return series with a known break, for testing and validation.
//!
//! ## Available Generators
//!
//! - **Level shift**: Gaussian noise around one mean up to a break index and
//!   another mean from there on
//! - **Pure noise**: no break at all, the null case
//! - **Alternating shift**: a level shift with deterministic `+a, -a, +a, ...`
//!   noise, whose segment means are exact

use crate::errors::{validate_parameter, ChangePointError, EngineResult};
use crate::secure_rng::ChainRng;
use crate::series::ReturnSeries;
use chrono::NaiveDate;
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Parameters of a synthetic level-shift series
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevelShiftConfig {
    /// Number of observations
    pub length: usize,
    /// First index of the "after" regime (`length` means no break)
    pub break_index: usize,
    /// Mean before the break
    pub mean_before: f64,
    /// Mean from the break on
    pub mean_after: f64,
    /// Noise standard deviation
    pub volatility: f64,
    /// Date of the first observation; later ones follow day by day
    pub start_date: NaiveDate,
    /// Random seed for reproducible generation
    pub seed: u64,
}

impl Default for LevelShiftConfig {
    fn default() -> Self {
        Self {
            length: 100,
            break_index: 50,
            mean_before: 0.0,
            mean_after: 0.0,
            volatility: 0.01,
            start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            seed: 42,
        }
    }
}

fn consecutive_dates(start: NaiveDate, length: usize) -> Vec<NaiveDate> {
    start.iter_days().take(length).collect()
}

fn check_layout(length: usize, break_index: usize) -> EngineResult<()> {
    if length == 0 {
        return Err(ChangePointError::Configuration {
            parameter: "length".to_string(),
            value: "0".to_string(),
            constraint: "at least 1 observation".to_string(),
        });
    }
    if break_index > length {
        return Err(ChangePointError::Configuration {
            parameter: "break_index".to_string(),
            value: break_index.to_string(),
            constraint: format!("at most the length {}", length),
        });
    }
    Ok(())
}

/// Generate a Gaussian level-shift series.
pub fn generate_level_shift(config: &LevelShiftConfig) -> EngineResult<ReturnSeries> {
    check_layout(config.length, config.break_index)?;
    validate_parameter(config.volatility, 0.0, f64::MAX, "volatility")?;

    let noise = Normal::new(0.0, config.volatility).map_err(|e| ChangePointError::Configuration {
        parameter: "volatility".to_string(),
        value: config.volatility.to_string(),
        constraint: e.to_string(),
    })?;
    let mut rng = ChainRng::with_seed(config.seed);

    let returns = (0..config.length)
        .map(|i| {
            let level = if i < config.break_index {
                config.mean_before
            } else {
                config.mean_after
            };
            level + noise.sample(&mut rng)
        })
        .collect();

    ReturnSeries::new(consecutive_dates(config.start_date, config.length), returns)
}

/// Level-shift series with default dates.
pub fn level_shift_series(
    length: usize,
    break_index: usize,
    mean_before: f64,
    mean_after: f64,
    volatility: f64,
    seed: u64,
) -> EngineResult<ReturnSeries> {
    generate_level_shift(&LevelShiftConfig {
        length,
        break_index,
        mean_before,
        mean_after,
        volatility,
        seed,
        ..LevelShiftConfig::default()
    })
}

/// Zero-mean Gaussian noise with no break.
pub fn pure_noise_series(length: usize, volatility: f64, seed: u64) -> EngineResult<ReturnSeries> {
    level_shift_series(length, length, 0.0, 0.0, volatility, seed)
}

/// Level shift with deterministic alternating noise of the given amplitude.
///
/// Each regime of even length has a sample mean equal to its level exactly.
pub fn alternating_shift_series(
    length: usize,
    break_index: usize,
    mean_before: f64,
    mean_after: f64,
    amplitude: f64,
) -> EngineResult<ReturnSeries> {
    check_layout(length, break_index)?;
    let returns = (0..length)
        .map(|i| {
            let level = if i < break_index { mean_before } else { mean_after };
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            level + sign * amplitude
        })
        .collect();
    ReturnSeries::new(
        consecutive_dates(LevelShiftConfig::default().start_date, length),
        returns,
    )
}
