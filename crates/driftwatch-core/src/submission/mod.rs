//! Shared run submissions and the peer comparison returned for them.

use crate::catalog::PromptCatalog;
use crate::config::SubmissionConfig;
use crate::errors::{FieldError, SubmissionError};
use crate::model::{SuiteRun, TestCase};
use crate::storage::RunRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSubmission {
    pub anonymous_user_id: String,
    #[serde(alias = "model")]
    pub claude_version: String,
    pub test_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_score: Option<f64>,
    pub total_tests: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_output_length: Option<f64>,
    pub error_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub test_details: Vec<TestDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDetail {
    pub test_id: String,
    #[serde(default)]
    pub test_name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Historical score row used for peer comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionScore {
    pub score: f64,
    pub region: Option<String>,
    pub anonymous_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub percentile: u32,
    pub global_avg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_avg: Option<f64>,
    pub total_users: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResponse {
    pub run_id: i64,
    pub comparison: Comparison,
    pub share_url: String,
}

fn check_range(
    errors: &mut Vec<FieldError>,
    field: &str,
    v: f64,
    lo: f64,
    hi: Option<f64>,
) {
    let ok = v >= lo && hi.map_or(v.is_finite(), |hi| v <= hi);
    if !ok {
        let message = match hi {
            Some(hi) => format!("must be between {} and {}", lo, hi),
            None => format!("must be >= {}", lo),
        };
        errors.push(FieldError::new(field, message));
    }
}

fn check_id(errors: &mut Vec<FieldError>, field: &str, v: &str) {
    if v.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    } else if v.chars().count() > MAX_ID_LEN {
        errors.push(FieldError::new(
            field,
            format!("must be at most {} characters", MAX_ID_LEN),
        ));
    }
}

impl RunSubmission {
    /// Checks every bound and reports all violations together.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        check_id(&mut errors, "anonymous_user_id", &self.anonymous_user_id);
        check_id(&mut errors, "claude_version", &self.claude_version);
        if !(0..=100).contains(&self.test_score) {
            errors.push(FieldError::new("test_score", "must be between 0 and 100"));
        }
        if let Some(v) = self.continuous_score {
            check_range(&mut errors, "continuous_score", v, 0.0, Some(100.0));
        }
        if self.total_tests < 1 {
            errors.push(FieldError::new("total_tests", "must be >= 1"));
        }
        check_range(&mut errors, "error_rate", self.error_rate, 0.0, Some(1.0));
        if let Some(v) = self.ttft_ms {
            check_range(&mut errors, "ttft_ms", v, 0.0, None);
        }
        if let Some(v) = self.tokens_per_second {
            check_range(&mut errors, "tokens_per_second", v, 0.0, None);
        }
        if let Some(v) = self.avg_output_length {
            check_range(&mut errors, "avg_output_length", v, 0.0, None);
        }

        for (i, d) in self.test_details.iter().enumerate() {
            if d.test_id.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("test_details[{}].test_id", i),
                    "must not be empty",
                ));
            }
            if let Some(s) = d.score {
                check_range(
                    &mut errors,
                    &format!("test_details[{}].score", i),
                    s,
                    0.0,
                    Some(100.0),
                );
            }
            if let Some(ms) = d.response_time_ms {
                check_range(
                    &mut errors,
                    &format!("test_details[{}].response_time_ms", i),
                    ms,
                    0.0,
                    None,
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Score used for ranking: the continuous score when present.
    pub fn effective_score(&self) -> f64 {
        self.continuous_score.unwrap_or(self.test_score as f64)
    }

    /// Builds a shareable record from a persisted run and its cases.
    pub fn from_suite_run(
        run: &SuiteRun,
        cases: &[TestCase],
        catalog: &PromptCatalog,
        anonymous_user_id: &str,
    ) -> Self {
        let test_score = if run.correctness_total > 0 {
            (100.0 * f64::from(run.correctness_score) / f64::from(run.correctness_total)).round()
                as i64
        } else {
            0
        };

        let scored: Vec<u8> = cases.iter().filter_map(|c| c.score).collect();
        let continuous_score = if scored.is_empty() {
            None
        } else {
            let sum: u32 = scored.iter().map(|s| u32::from(*s)).sum();
            Some(100.0 * f64::from(sum) / scored.len() as f64)
        };

        let ok: Vec<&TestCase> = cases.iter().filter(|c| c.error_message.is_none()).collect();
        let avg_output_length = if ok.is_empty() {
            None
        } else {
            let sum: u64 = ok.iter().map(|c| u64::from(c.output_tokens)).sum();
            Some(sum as f64 / ok.len() as f64)
        };

        let test_details = cases
            .iter()
            .map(|c| TestDetail {
                test_id: format!("{}#{}", c.prompt_id, c.replicate_number),
                test_name: catalog
                    .get(&c.prompt_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| c.prompt_id.clone()),
                passed: c.success,
                score: c.score.map(|s| f64::from(s) * 100.0),
                response_time_ms: Some(c.total_latency * 1000.0),
                output_quality: None,
                metrics: Some(serde_json::json!({
                    "ttft": c.ttft,
                    "tokens_per_sec": c.tokens_per_sec,
                    "output_tokens": c.output_tokens,
                    "finish_reason": c.finish_reason,
                })),
                error_message: c.error_message.clone(),
            })
            .collect();

        Self {
            anonymous_user_id: anonymous_user_id.to_string(),
            claude_version: run.model_id.clone(),
            test_score,
            continuous_score,
            total_tests: cases.len().max(1) as i64,
            ttft_ms: run.ttft_median.map(|s| s * 1000.0),
            tokens_per_second: run.tokens_per_sec_median,
            avg_output_length,
            error_rate: run.error_rate,
            region: run.region.clone(),
            test_details,
        }
    }
}

/// Ranks `sub` against `history`, which must not contain `sub` itself.
pub fn compute_comparison(sub: &RunSubmission, history: &[SubmissionScore]) -> Comparison {
    let score = sub.effective_score();

    let percentile = if history.is_empty() {
        100
    } else {
        let below = history.iter().filter(|h| h.score < score).count();
        (100 * below / history.len()) as u32
    };

    let global_avg = if history.is_empty() {
        score
    } else {
        history.iter().map(|h| h.score).sum::<f64>() / history.len() as f64
    };

    let region_avg = sub.region.as_deref().and_then(|region| {
        let same: Vec<f64> = history
            .iter()
            .filter(|h| h.region.as_deref() == Some(region))
            .map(|h| h.score)
            .collect();
        if same.is_empty() {
            None
        } else {
            Some(same.iter().sum::<f64>() / same.len() as f64)
        }
    });

    let mut users: HashSet<&str> = history.iter().map(|h| h.anonymous_user_id.as_str()).collect();
    users.insert(sub.anonymous_user_id.as_str());

    Comparison {
        percentile,
        global_avg,
        region_avg,
        total_users: users.len() as u32,
    }
}

pub fn share_url(base: &str, run_id: i64) -> String {
    format!("{}/r/{}", base.trim_end_matches('/'), run_id)
}

/// Validates, stores and ranks a submission. Nothing is written when validation fails.
pub async fn submit(
    repo: &dyn RunRepository,
    sub: &RunSubmission,
    cfg: &SubmissionConfig,
) -> Result<ComparisonResponse, SubmissionError> {
    sub.validate().map_err(SubmissionError::Invalid)?;

    let since: DateTime<Utc> =
        Utc::now() - chrono::Duration::days(i64::from(cfg.comparison_window_days));
    let history = repo.submission_scores_since(since).await?;
    let run_id = repo.insert_submission(sub).await?;
    let comparison = compute_comparison(sub, &history);

    tracing::info!(
        run_id,
        percentile = comparison.percentile,
        total_users = comparison.total_users,
        "submission stored"
    );

    Ok(ComparisonResponse {
        run_id,
        comparison,
        share_url: share_url(&cfg.share_base_url, run_id),
    })
}
