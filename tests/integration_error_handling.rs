//! Integration tests for error handling and edge cases
//!
//! Covers out-of-order calls on the engine state machine, malformed input,
//! degenerate sampling runs and the undefined percentage change.

use brent_changepoint::{
    diagnostics, generators::*, percentage_change, CancellationToken, ChangePointEngine,
    ChangePointError, ChangePointModel, ConvergenceStatus, EngineConfig, EngineState,
    PosteriorSampleSet, PosteriorSampler, ReturnSeries,
};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

fn days(n: usize) -> Vec<NaiveDate> {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .iter_days()
        .take(n)
        .collect()
}

fn engine() -> ChangePointEngine {
    ChangePointEngine::new(EngineConfig::quick().with_seed(1)).unwrap()
}

fn series() -> ReturnSeries {
    level_shift_series(40, 20, 0.0, 1.0, 0.2, 1).unwrap()
}

fn assert_precondition(err: ChangePointError, missing: EngineState) {
    assert!(err.is_precondition(), "not a precondition error: {:?}", err);
    assert_eq!(err.missing_state(), Some(missing), "{}", err);
}

#[test]
fn test_calls_on_fresh_engine() {
    let mut e = engine();

    assert!(matches!(
        e.build_model().unwrap_err(),
        ChangePointError::DataNotPrepared { current: EngineState::Unfit, .. }
    ));
    assert_precondition(e.sample().unwrap_err(), EngineState::ModelBuilt);
    assert_precondition(e.diagnose().unwrap_err(), EngineState::Sampled);
    assert_precondition(e.estimate(None).unwrap_err(), EngineState::Sampled);
    assert_eq!(e.state(), EngineState::Unfit);
}

#[test]
fn test_calls_after_prepare() {
    let mut e = engine();
    e.prepare(series()).unwrap();

    assert!(matches!(
        e.sample().unwrap_err(),
        ChangePointError::ModelNotBuilt { current: EngineState::DataPrepared, .. }
    ));
    assert_precondition(e.diagnose().unwrap_err(), EngineState::Sampled);
    assert_precondition(e.estimate(None).unwrap_err(), EngineState::Sampled);
    assert_eq!(e.state(), EngineState::DataPrepared);
}

#[test]
fn test_calls_after_build() {
    let mut e = engine();
    e.prepare(series()).unwrap();
    e.build_model().unwrap();

    assert!(matches!(
        e.diagnose().unwrap_err(),
        ChangePointError::NotSampled { current: EngineState::ModelBuilt, .. }
    ));
    assert_precondition(e.estimate(None).unwrap_err(), EngineState::Sampled);
    assert_eq!(e.state(), EngineState::ModelBuilt);
}

#[test]
fn test_estimate_before_diagnose() {
    let mut e = engine();
    e.prepare(series()).unwrap();
    e.build_model().unwrap();
    e.sample().unwrap();

    let err = e.estimate(None).unwrap_err();
    assert!(matches!(
        err,
        ChangePointError::NotAnalyzed {
            required: EngineState::Analyzed,
            current: EngineState::Sampled,
            ..
        }
    ));
    assert_eq!(e.state(), EngineState::Sampled);
    assert!(e.result().is_none());
}

#[test]
fn test_reprepare_resets_pipeline() {
    let mut e = engine();
    e.run(series(), None).unwrap();
    e.prepare(series()).unwrap();

    assert_eq!(e.state(), EngineState::DataPrepared);
    assert!(e.model().is_none());
    assert_precondition(e.sample().unwrap_err(), EngineState::ModelBuilt);
}

#[test]
fn test_empty_series_is_data_not_prepared() {
    let err = ReturnSeries::new(vec![], vec![]).unwrap_err();
    assert!(matches!(err, ChangePointError::DataNotPrepared { .. }));
}

#[test]
fn test_malformed_series_is_rejected() {
    assert!(ReturnSeries::new(days(3), vec![0.1, f64::INFINITY, 0.2]).is_err());
    assert!(ReturnSeries::new(days(3), vec![0.1, 0.2]).is_err());
    let mut dates = days(3);
    dates.swap(0, 2);
    assert!(ReturnSeries::new(dates, vec![0.1, 0.2, 0.3]).is_err());
}

#[test]
fn test_short_series_fails_model_build() {
    let mut e = engine();
    let short = ReturnSeries::new(days(9), (0..9).map(|i| i as f64 * 0.01).collect()).unwrap();
    e.prepare(short).unwrap();

    let err = e.build_model().unwrap_err();
    match &err {
        ChangePointError::Configuration { parameter, value, constraint } => {
            assert_eq!(parameter, "series length");
            assert_eq!(value, "9");
            assert_eq!(constraint, "at least 10 observations");
        }
        other => panic!("expected Configuration, got {:?}", other),
    }
    assert!(!err.is_precondition());
    assert_eq!(e.state(), EngineState::DataPrepared);
}

#[test]
fn test_constant_series_fails_model_build() {
    let mut e = engine();
    e.prepare(ReturnSeries::new(days(30), vec![0.002; 30]).unwrap())
        .unwrap();
    assert!(matches!(
        e.build_model().unwrap_err(),
        ChangePointError::Configuration { .. }
    ));
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let bad_window = EngineConfig::quick().with_tau_window(0.9, 0.1);
    assert!(ChangePointEngine::new(bad_window).is_err());

    let bad_draws = EngineConfig {
        draws_per_chain: 0,
        ..EngineConfig::quick()
    };
    assert!(matches!(
        ChangePointEngine::new(bad_draws).unwrap_err(),
        ChangePointError::Configuration { .. }
    ));
}

#[test]
fn test_single_short_chain_is_not_converged() {
    let config = EngineConfig {
        draws_per_chain: 5,
        warmup_fraction: 1.0,
        ..EngineConfig::quick()
    };
    let model = ChangePointModel::build(Arc::new(series()), &config).unwrap();
    let chain = PosteriorSampler::new(&config)
        .run_chain(&model, 0, 77, &CancellationToken::new(), None)
        .unwrap();
    assert_eq!(chain.len(), 5);

    let set = PosteriorSampleSet::new(vec![chain], 77);
    let report = diagnostics::diagnose(&set, &config, model.len()).unwrap();
    assert_eq!(report.status, ConvergenceStatus::NotConverged);
    assert!(!report.issues.is_empty());
}

#[test]
fn test_cancellation_discards_sampling() {
    let mut e = engine();
    e.prepare(series()).unwrap();
    e.build_model().unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = e.sample_with_cancellation(&token).unwrap_err();

    assert!(matches!(err, ChangePointError::SamplingCancelled { .. }));
    assert_eq!(e.state(), EngineState::ModelBuilt);
    assert!(e.samples().is_none());
}

#[test]
fn test_exhausted_budget_yields_no_estimate() {
    let config = EngineConfig {
        time_budget: Some(Duration::ZERO),
        ..EngineConfig::quick()
    };
    let mut e = ChangePointEngine::new(config).unwrap();
    e.prepare(series()).unwrap();
    e.build_model().unwrap();
    e.sample().unwrap();

    let samples = e.samples().unwrap();
    assert!(samples.is_budget_exhausted());
    assert_eq!(samples.total_draws(), 0);

    let report = e.diagnose().unwrap();
    assert_eq!(report.status, ConvergenceStatus::NotConverged);

    assert!(matches!(
        e.estimate(None).unwrap_err(),
        ChangePointError::InsufficientDraws { .. }
    ));
    assert_eq!(e.state(), EngineState::Analyzed);
}

#[test]
fn test_zero_base_percentage_is_sentinel() {
    assert_eq!(percentage_change(0.0, 0.01), None);
    assert_eq!(percentage_change(-0.0, -0.01), None);
    assert!(percentage_change(1e-300, 0.01).is_some());
}

#[cfg(feature = "serde")]
#[test]
fn test_sentinel_serialises_as_null() {
    use brent_changepoint::{ChangePointResult, Confidence};

    let result = ChangePointResult {
        tau_index: 3,
        change_date: NaiveDate::from_ymd_opt(2020, 4, 20).unwrap(),
        mean_return_before: 0.0,
        mean_return_after: 0.01,
        percentage_change: None,
        implied_price_change: 1.005,
        probability_increase: 1.0,
        tau_posterior_share: 0.5,
        nearest_event: None,
        confidence: Confidence::Low,
    };
    let json = serde_json::to_value(&result).unwrap();
    assert!(json["percentage_change"].is_null());
    assert_eq!(json["change_date"], "2020-04-20");
    assert_eq!(json["confidence"], "low");
}
