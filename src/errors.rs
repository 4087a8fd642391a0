//! Error types and validation functions for change-point analysis.
//!
//! Every stage of the engine reports failures through [`ChangePointError`].
//! Precondition violations name the operation that was attempted and the state
//! the engine was in, so callers can tell which predecessor stage is missing.
//! Statistical-quality problems (non-convergence) are deliberately *not*
//! errors; they travel as a flag on the diagnostics report and the result.

use crate::engine::EngineState;
use std::sync::Arc;
use thiserror::Error;

/// Error types for change-point engine operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ChangePointError {
    /// The input series is missing, empty or malformed.
    #[error("Data not prepared for {operation}: {reason} (engine state: {current})")]
    DataNotPrepared {
        /// Operation that needed prepared data
        operation: String,
        /// What is wrong with the data, or why it is absent
        reason: String,
        /// Engine state at the time of the call
        current: EngineState,
    },

    /// Invalid model input or configuration value.
    #[error("Configuration error: {parameter} = {value}, expected {constraint}")]
    Configuration {
        /// Parameter or input that failed validation
        parameter: String,
        /// Offending value (rendered for display)
        value: String,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Sampling was requested before the model was built.
    #[error("Model not built: {operation} requires state {required}, engine is {current}")]
    ModelNotBuilt {
        /// Operation that was attempted
        operation: String,
        /// State the operation requires
        required: EngineState,
        /// Engine state at the time of the call
        current: EngineState,
    },

    /// Diagnostics or estimation were requested before sampling.
    #[error("Not sampled: {operation} requires state {required}, engine is {current}")]
    NotSampled {
        /// Operation that was attempted
        operation: String,
        /// State the operation requires
        required: EngineState,
        /// Engine state at the time of the call
        current: EngineState,
    },

    /// Estimation was requested before convergence diagnostics ran.
    #[error("Not analyzed: {operation} requires state {required}, engine is {current}")]
    NotAnalyzed {
        /// Operation that was attempted
        operation: String,
        /// State the operation requires
        required: EngineState,
        /// Engine state at the time of the call
        current: EngineState,
    },

    /// Series shorter than the minimum the model accepts.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// Chains of unequal length reached the diagnostics.
    #[error("Incomplete chains: expected {expected} draws per chain, chain {chain} has {actual}")]
    IncompleteChains {
        /// Draws every chain should hold
        expected: usize,
        /// Index of the first offending chain
        chain: usize,
        /// Draws that chain actually holds
        actual: usize,
    },

    /// A chain observed the cancellation flag; all buffers were discarded.
    #[error("Sampling cancelled: chain {chain} stopped at iteration {iteration}")]
    SamplingCancelled {
        /// Chain that observed cancellation first
        chain: usize,
        /// Iteration at which it stopped
        iteration: usize,
    },

    /// The posterior sample set holds no usable draws.
    #[error("Insufficient draws for {operation}: sample set holds {available} draws")]
    InsufficientDraws {
        /// Operation that needed draws
        operation: String,
        /// Number of draws available
        available: usize,
    },

    /// Numerical computation failed.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
    },

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    Io {
        /// I/O operation that failed
        operation: String,
        /// Underlying error if available
        #[source]
        source: Option<Arc<std::io::Error>>,
    },
}

/// Result type for change-point engine operations.
pub type EngineResult<T> = Result<T, ChangePointError>;

impl ChangePointError {
    /// Whether this error is a state-machine precondition violation.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChangePointError::DataNotPrepared { .. }
                | ChangePointError::ModelNotBuilt { .. }
                | ChangePointError::NotSampled { .. }
                | ChangePointError::NotAnalyzed { .. }
        )
    }

    /// The predecessor state a precondition error is asking for.
    pub fn missing_state(&self) -> Option<EngineState> {
        match self {
            ChangePointError::DataNotPrepared { .. } => Some(EngineState::DataPrepared),
            ChangePointError::ModelNotBuilt { required, .. }
            | ChangePointError::NotSampled { required, .. }
            | ChangePointError::NotAnalyzed { required, .. } => Some(*required),
            _ => None,
        }
    }

    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        ChangePointError::Io {
            operation: operation.into(),
            source: Some(Arc::new(source)),
        }
    }
}

impl From<csv::Error> for ChangePointError {
    fn from(err: csv::Error) -> Self {
        let operation = format!("csv: {}", err);
        match err.into_kind() {
            csv::ErrorKind::Io(io_err) => ChangePointError::io(operation, io_err),
            _ => ChangePointError::Io {
                operation,
                source: None,
            },
        }
    }
}

/// Validates that data has sufficient length for the model.
pub fn validate_data_length(data: &[f64], min_required: usize) -> EngineResult<()> {
    if data.len() < min_required {
        Err(ChangePointError::InsufficientData {
            required: min_required,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}

/// Validates that a parameter is within `[min, max]`.
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> EngineResult<()> {
    if value.is_nan() || value < min || value > max {
        Err(ChangePointError::Configuration {
            parameter: name.to_string(),
            value: value.to_string(),
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that all values in a slice are finite.
///
/// Returns immediately on the first non-finite value and reports its index.
pub fn validate_all_finite(data: &[f64], name: &str) -> EngineResult<()> {
    match data.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ChangePointError::Configuration {
            parameter: format!("{}[{}]", name, index),
            value: data[index].to_string(),
            constraint: "finite value (not NaN or infinite)".to_string(),
        }),
        None => Ok(()),
    }
}
