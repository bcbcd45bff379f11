use crate::errors::EndpointError;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    Correctness,
    Performance,
}

/// Named regression indicators. The vocabulary is closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RegressionFlag {
    QualityRegression,
    PerformanceRegressionTps,
    PerformanceRegressionLatency,
    OutputCapDetected,
    ErrorRateIncrease,
}

impl RegressionFlag {
    pub const ALL: [RegressionFlag; 5] = [
        RegressionFlag::QualityRegression,
        RegressionFlag::PerformanceRegressionTps,
        RegressionFlag::PerformanceRegressionLatency,
        RegressionFlag::OutputCapDetected,
        RegressionFlag::ErrorRateIncrease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegressionFlag::QualityRegression => "quality_regression",
            RegressionFlag::PerformanceRegressionTps => "performance_regression_tps",
            RegressionFlag::PerformanceRegressionLatency => "performance_regression_latency",
            RegressionFlag::OutputCapDetected => "output_cap_detected",
            RegressionFlag::ErrorRateIncrease => "error_rate_increase",
        }
    }
}

impl fmt::Display for RegressionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type FlagSet = BTreeSet<RegressionFlag>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Green,
    Yellow,
    Red,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Green => "GREEN",
            RunStatus::Yellow => "YELLOW",
            RunStatus::Red => "RED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GREEN" => Some(RunStatus::Green),
            "YELLOW" => Some(RunStatus::Yellow),
            "RED" => Some(RunStatus::Red),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one call against the endpoint. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    /// Seconds to the first content chunk; absent when no content was streamed.
    pub ttft: Option<f64>,
    pub total_latency: f64,
    pub output_tokens: u32,
    pub tokens_per_sec: f64,
    pub finish_reason: Option<String>,
    pub request_id: String,
    pub output_hash: String,
    pub error: Option<EndpointError>,
}

impl ExecutionResult {
    pub fn completed(
        output: String,
        ttft: Option<f64>,
        total_latency: f64,
        output_tokens: u32,
        finish_reason: Option<String>,
        request_id: String,
    ) -> Self {
        let tokens_per_sec = if total_latency > 0.0 {
            output_tokens as f64 / total_latency
        } else {
            0.0
        };
        let output_hash = crate::fingerprint::sha256_hex(&output);
        Self {
            output,
            ttft,
            total_latency,
            output_tokens,
            tokens_per_sec,
            finish_reason,
            request_id,
            output_hash,
            error: None,
        }
    }

    pub fn failed(error: EndpointError, request_id: Option<String>) -> Self {
        Self {
            output: String::new(),
            ttft: None,
            total_latency: 0.0,
            output_tokens: 0,
            tokens_per_sec: 0.0,
            finish_reason: None,
            request_id: request_id.unwrap_or_else(synthesize_request_id),
            output_hash: crate::fingerprint::sha256_hex(""),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub fn synthesize_request_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}

/// One prompt x one replicate, scored.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub prompt_id: String,
    pub prompt_version: String,
    pub prompt_type: PromptType,
    pub replicate_number: u32,
    pub execution: ExecutionResult,
    /// 0 or 1 for correctness prompts and for errors; None for successful performance calls.
    pub score: Option<u8>,
    pub success: bool,
    pub refusal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRun {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    pub provider: String,
    pub region: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub suite_version: String,
    pub correctness_score: u32,
    pub correctness_total: u32,
    pub ttft_median: Option<f64>,
    pub ttft_p95: Option<f64>,
    pub latency_median: Option<f64>,
    pub latency_p95: Option<f64>,
    pub tokens_per_sec_median: Option<f64>,
    pub tokens_per_sec_p95: Option<f64>,
    pub output_tokens_median: Option<f64>,
    pub error_rate: f64,
    pub refusal_rate: f64,
    pub status: RunStatus,
    pub flags: FlagSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub run_id: i64,
    pub prompt_id: String,
    pub prompt_version: String,
    pub replicate_number: u32,
    pub request_id: String,
    pub success: bool,
    pub score: Option<u8>,
    pub ttft: Option<f64>,
    pub total_latency: f64,
    pub output_tokens: u32,
    pub tokens_per_sec: f64,
    pub finish_reason: Option<String>,
    pub output_hash: String,
    pub raw_output: Option<String>,
    pub error_message: Option<String>,
    pub refusal: bool,
}

impl TestCase {
    pub fn from_result(run_id: i64, r: &TestResult, store_raw_output: bool) -> Self {
        let e = &r.execution;
        Self {
            id: 0,
            run_id,
            prompt_id: r.prompt_id.clone(),
            prompt_version: r.prompt_version.clone(),
            replicate_number: r.replicate_number,
            request_id: e.request_id.clone(),
            success: r.success,
            score: r.score,
            ttft: e.ttft,
            total_latency: e.total_latency,
            output_tokens: e.output_tokens,
            tokens_per_sec: e.tokens_per_sec,
            finish_reason: e.finish_reason.clone(),
            output_hash: e.output_hash.clone(),
            raw_output: if store_raw_output && !e.is_error() {
                Some(e.output.clone())
            } else {
                None
            },
            error_message: e.error.as_ref().map(|err| err.to_string()),
            refusal: r.refusal,
        }
    }
}

/// Mean of each numeric run field over the trailing window. Zero-filled when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingBaseline {
    pub run_count: u32,
    pub correctness_score: f64,
    pub ttft_median: f64,
    pub ttft_p95: f64,
    pub latency_median: f64,
    pub latency_p95: f64,
    pub tokens_per_sec_median: f64,
    pub tokens_per_sec_p95: f64,
    pub output_tokens_median: f64,
    pub error_rate: f64,
    pub refusal_rate: f64,
}

/// Timestamps are kept at microsecond precision so they survive both stores unchanged.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
