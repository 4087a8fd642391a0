//! Dated log-return series consumed by the change-point model.
//!
//! A [`ReturnSeries`] is the output contract of the series-preparation step:
//! strictly increasing dates, one finite log-return per date. It is immutable
//! once built. [`ReturnSeries::from_prices`] covers the common case of turning a
//! dated price path into log-returns; reading the prices from disk is left to
//! the caller.

use crate::errors::{validate_all_finite, ChangePointError, EngineResult};
use crate::engine::EngineState;
use chrono::NaiveDate;

/// Ordered, gap-free sequence of dated log-returns
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    returns: Vec<f64>,
}

fn malformed(reason: String) -> ChangePointError {
    ChangePointError::DataNotPrepared {
        operation: "prepare series".to_string(),
        reason,
        current: EngineState::Unfit,
    }
}

impl ReturnSeries {
    /// Build a series from parallel date and return vectors.
    ///
    /// Fails with `DataNotPrepared` when the series is empty, the lengths
    /// differ, dates are not strictly increasing, or a return is not finite.
    pub fn new(dates: Vec<NaiveDate>, returns: Vec<f64>) -> EngineResult<Self> {
        if returns.is_empty() {
            return Err(malformed("series is empty".to_string()));
        }
        if dates.len() != returns.len() {
            return Err(malformed(format!(
                "{} dates for {} returns",
                dates.len(),
                returns.len()
            )));
        }
        if let Some(i) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(malformed(format!(
                "dates not strictly increasing at index {}: {} then {}",
                i + 1,
                dates[i],
                dates[i + 1]
            )));
        }
        validate_all_finite(&returns, "log_returns").map_err(|e| malformed(e.to_string()))?;

        Ok(Self { dates, returns })
    }

    /// Compute log-returns from a dated price path.
    ///
    /// Only every `stride`-th price is kept before differencing (`stride = 1`
    /// keeps all of them). Return `i` is dated with the later of its two prices.
    pub fn from_prices(dates: &[NaiveDate], prices: &[f64], stride: usize) -> EngineResult<Self> {
        if stride == 0 {
            return Err(malformed("stride must be at least 1".to_string()));
        }
        if dates.len() != prices.len() {
            return Err(malformed(format!(
                "{} dates for {} prices",
                dates.len(),
                prices.len()
            )));
        }
        if let Some(i) = prices.iter().position(|&p| p <= 0.0 || !p.is_finite()) {
            return Err(malformed(format!(
                "price at index {} is not a positive finite number: {}",
                i, prices[i]
            )));
        }

        let kept: Vec<(NaiveDate, f64)> = dates
            .iter()
            .zip(prices)
            .step_by(stride)
            .map(|(&d, &p)| (d, p))
            .collect();

        let (out_dates, returns): (Vec<NaiveDate>, Vec<f64>) = kept
            .windows(2)
            .map(|w| (w[1].0, w[1].1.ln() - w[0].1.ln()))
            .unzip();

        log::info!(
            "Prepared {} log-return observations from {} prices (stride {})",
            returns.len(),
            prices.len(),
            stride
        );
        Self::new(out_dates, returns)
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    /// Always false for a constructed series; kept for API symmetry
    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Log-return values in date order
    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    /// Dates in increasing order
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Date of observation `index`, if in range
    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    /// Iterate over `(date, log_return)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.returns.iter().copied())
    }
}
