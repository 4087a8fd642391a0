//! # Change-Point Result
//!
//! The final record of one analysis: where the break is, how the mean return
//! moved across it, which catalog event sits closest in time, and how much the
//! diagnostics trust the whole thing.
//!
//! With the `serde` feature the record serialises with the external field
//! names `mean_log_return_before` / `mean_log_return_after` and the date as
//! `YYYY-MM-DD`. The same columns are written by [`ChangePointResult::write_csv`].

use crate::errors::{ChangePointError, EngineResult};
use crate::events::EventAssociation;
use chrono::NaiveDate;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Column header of the persisted record
pub const CSV_HEADER: [&str; 5] = [
    "tau_index",
    "change_date",
    "mean_log_return_before",
    "mean_log_return_after",
    "percentage_change",
];

/// Trust level attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Confidence {
    /// Diagnostics converged
    High,
    /// Diagnostics did not converge; treat the estimate with caution
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// Outcome of a full change-point analysis
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChangePointResult {
    /// Posterior mode of the break index
    pub tau_index: usize,
    /// Date of the last "before" observation
    pub change_date: NaiveDate,
    /// Posterior mean of `mu_before`
    #[cfg_attr(feature = "serde", serde(rename = "mean_log_return_before"))]
    pub mean_return_before: f64,
    /// Posterior mean of `mu_after`
    #[cfg_attr(feature = "serde", serde(rename = "mean_log_return_after"))]
    pub mean_return_after: f64,
    /// Relative change of the mean in percent; `None` when the base is zero
    pub percentage_change: Option<f64>,
    /// Implied change of the daily price factor in percent
    pub implied_price_change: f64,
    /// Posterior probability that the mean rose across the break
    pub probability_increase: f64,
    /// Fraction of draws at the modal break index
    pub tau_posterior_share: f64,
    /// Catalog event matched to `change_date`
    pub nearest_event: Option<EventAssociation>,
    /// High when diagnostics converged
    pub confidence: Confidence,
}

impl ChangePointResult {
    /// Write the header and this record as CSV.
    ///
    /// An undefined percentage change is written as an empty cell.
    pub fn write_csv<W: Write>(&self, writer: W) -> EngineResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(CSV_HEADER)?;
        csv_writer.write_record([
            self.tau_index.to_string(),
            self.change_date.format("%Y-%m-%d").to_string(),
            self.mean_return_before.to_string(),
            self.mean_return_after.to_string(),
            self.percentage_change.map(|p| p.to_string()).unwrap_or_default(),
        ])?;
        csv_writer
            .flush()
            .map_err(|e| ChangePointError::io("flush change-point csv", e))
    }

    /// Persist the record to `path`, creating missing parent directories.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ChangePointError::io(format!("create directory {}", parent.display()), e)
            })?;
        }
        let file = File::create(path)
            .map_err(|e| ChangePointError::io(format!("create {}", path.display()), e))?;
        self.write_csv(file)?;
        log::info!("Saved change-point result to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for ChangePointResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Change point: index {} on {} (posterior share {:.3}, {} confidence)",
            self.tau_index, self.change_date, self.tau_posterior_share, self.confidence
        )?;
        writeln!(
            f,
            "Mean log-return: {:.6} -> {:.6}",
            self.mean_return_before, self.mean_return_after
        )?;
        match self.percentage_change {
            Some(p) => writeln!(f, "Percentage change: {:.2}%", p)?,
            None => writeln!(f, "Percentage change: undefined (zero base)")?,
        }
        writeln!(
            f,
            "Implied daily price change: {:.4}%, P(increase) = {:.3}",
            self.implied_price_change, self.probability_increase
        )?;
        if let Some(a) = &self.nearest_event {
            writeln!(
                f,
                "Nearest event: {} on {} ({:+} days): {}",
                a.event.name, a.event.date, a.distance_days, a.event.description
            )?;
        }
        Ok(())
    }
}
