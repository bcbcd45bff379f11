//! Rolling-baseline regression rules.
//!
//! Both functions are pure; the same inputs always yield the same flags.

use crate::model::{FlagSet, RegressionFlag, RollingBaseline, RunStatus, SuiteRun};
use serde::Serialize;

/// Correctness points a run may drop below the baseline mean before it is flagged.
pub const QUALITY_DROP: f64 = 2.0;
pub const TPS_FLOOR_RATIO: f64 = 0.5;
pub const LATENCY_CEILING_RATIO: f64 = 2.0;
pub const OUTPUT_CAP_RATIO: f64 = 0.75;
pub const ERROR_RATE_MARGIN: f64 = 0.10;

/// The subset of a run that the rules look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentMetrics {
    pub correctness_score: f64,
    pub ttft_p95: Option<f64>,
    pub latency_p95: Option<f64>,
    pub tokens_per_sec_median: Option<f64>,
    pub output_tokens_median: Option<f64>,
    pub error_rate: f64,
}

impl From<&SuiteRun> for CurrentMetrics {
    fn from(run: &SuiteRun) -> Self {
        Self {
            correctness_score: f64::from(run.correctness_score),
            ttft_p95: run.ttft_p95,
            latency_p95: run.latency_p95,
            tokens_per_sec_median: run.tokens_per_sec_median,
            output_tokens_median: run.output_tokens_median,
            error_rate: run.error_rate,
        }
    }
}

pub fn detect(current: &CurrentMetrics, baseline: &RollingBaseline) -> FlagSet {
    let mut flags = FlagSet::new();
    if baseline.run_count == 0 {
        return flags;
    }

    if baseline.correctness_score > 0.0
        && current.correctness_score <= baseline.correctness_score - QUALITY_DROP
    {
        flags.insert(RegressionFlag::QualityRegression);
    }

    if let Some(tps) = current.tokens_per_sec_median {
        if baseline.tokens_per_sec_median > 0.0
            && tps < baseline.tokens_per_sec_median * TPS_FLOOR_RATIO
        {
            flags.insert(RegressionFlag::PerformanceRegressionTps);
        }
    }

    if let Some(p95) = current.latency_p95 {
        if baseline.latency_p95 > 0.0 && p95 > baseline.latency_p95 * LATENCY_CEILING_RATIO {
            flags.insert(RegressionFlag::PerformanceRegressionLatency);
        }
    }

    if let Some(tokens) = current.output_tokens_median {
        if baseline.output_tokens_median > 0.0
            && tokens < baseline.output_tokens_median * OUTPUT_CAP_RATIO
        {
            flags.insert(RegressionFlag::OutputCapDetected);
        }
    }

    if current.error_rate > baseline.error_rate + ERROR_RATE_MARGIN {
        flags.insert(RegressionFlag::ErrorRateIncrease);
    }

    flags
}

pub fn calculate_status(flags: &FlagSet) -> RunStatus {
    match flags.len() {
        0 => RunStatus::Green,
        1 => RunStatus::Yellow,
        _ => RunStatus::Red,
    }
}
