use crate::model::SuiteRun;
use crate::storage::RunRepository;
use serde::{Deserialize, Serialize};

/// Latest-run summary for dashboards and `driftwatch status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// GREEN, YELLOW, RED, or UNKNOWN before the first run.
    pub status: String,
    pub last_run: Option<String>,
    pub correctness_score: Option<u32>,
    pub correctness_total: Option<u32>,
    pub flags: Vec<String>,
    pub run_id: Option<i64>,
}

impl StatusSnapshot {
    pub fn unknown() -> Self {
        Self {
            status: "UNKNOWN".to_string(),
            last_run: None,
            correctness_score: None,
            correctness_total: None,
            flags: Vec::new(),
            run_id: None,
        }
    }

    pub fn from_run(run: &SuiteRun) -> Self {
        Self {
            status: run.status.as_str().to_string(),
            last_run: Some(run.timestamp.to_rfc3339()),
            correctness_score: Some(run.correctness_score),
            correctness_total: Some(run.correctness_total),
            flags: run.flags.iter().map(|f| f.as_str().to_string()).collect(),
            run_id: Some(run.id),
        }
    }

    pub async fn load(repo: &dyn RunRepository) -> anyhow::Result<Self> {
        let latest = repo.get_recent_runs(1).await?;
        Ok(latest.first().map(Self::from_run).unwrap_or_else(Self::unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_serializes_camel_case() {
        let v = serde_json::to_value(StatusSnapshot::unknown()).unwrap();
        assert_eq!(v["status"], "UNKNOWN");
        assert!(v["lastRun"].is_null());
        assert!(v["runId"].is_null());
        assert_eq!(v["flags"], serde_json::json!([]));
    }
}
