//! Per-run aggregation over scored replicates.

use super::stats::summarize;
use crate::model::{PromptType, TestResult};
use std::collections::BTreeMap;

/// Best-of-N: the highest replicate score per correctness prompt, summed.
pub fn correctness_score(results: &[TestResult]) -> u32 {
    let mut best: BTreeMap<&str, u8> = BTreeMap::new();
    for r in results
        .iter()
        .filter(|r| r.prompt_type == PromptType::Correctness)
    {
        let s = r.score.unwrap_or(0);
        let e = best.entry(r.prompt_id.as_str()).or_insert(0);
        *e = (*e).max(s);
    }
    best.values().map(|s| u32::from(*s)).sum()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSummary {
    pub ttft_median: Option<f64>,
    pub ttft_p95: Option<f64>,
    pub latency_median: Option<f64>,
    pub latency_p95: Option<f64>,
    pub tokens_per_sec_median: Option<f64>,
    pub tokens_per_sec_p95: Option<f64>,
    pub output_tokens_median: Option<f64>,
}

/// Percentiles over successful performance replicates only.
pub fn performance_summary(results: &[TestResult]) -> PerformanceSummary {
    let ok: Vec<&TestResult> = results
        .iter()
        .filter(|r| r.prompt_type == PromptType::Performance && r.success)
        .collect();
    if ok.is_empty() {
        return PerformanceSummary::default();
    }

    let ttfts: Vec<f64> = ok.iter().filter_map(|r| r.execution.ttft).collect();
    let latencies: Vec<f64> = ok.iter().map(|r| r.execution.total_latency).collect();
    let tps: Vec<f64> = ok.iter().map(|r| r.execution.tokens_per_sec).collect();
    let tokens: Vec<f64> = ok
        .iter()
        .map(|r| f64::from(r.execution.output_tokens))
        .collect();

    let (ttft_median, ttft_p95) = summarize(ttfts);
    let (latency_median, latency_p95) = summarize(latencies);
    let (tokens_per_sec_median, tokens_per_sec_p95) = summarize(tps);
    let (output_tokens_median, _) = summarize(tokens);

    PerformanceSummary {
        ttft_median,
        ttft_p95,
        latency_median,
        latency_p95,
        tokens_per_sec_median,
        tokens_per_sec_p95,
        output_tokens_median,
    }
}

/// `(error_rate, refusal_rate)` over every replicate in the run.
pub fn rates(results: &[TestResult]) -> (f64, f64) {
    if results.is_empty() {
        return (0.0, 0.0);
    }
    let n = results.len() as f64;
    let errors = results.iter().filter(|r| r.execution.is_error()).count() as f64;
    let refusals = results.iter().filter(|r| r.refusal).count() as f64;
    (errors / n, refusals / n)
}
