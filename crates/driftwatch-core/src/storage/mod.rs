use crate::model::{RollingBaseline, SuiteRun, TestCase};
use crate::submission::{RunSubmission, SubmissionScore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod postgres;
pub mod schema;
pub mod store;

pub use postgres::PgStore;
pub use store::Store;

/// Append-only run history plus the small key/value table for operator settings.
///
/// Rows are immutable after insert; there is no update or delete for runs or cases.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert_run(&self, run: &SuiteRun) -> anyhow::Result<i64>;
    async fn insert_test_case(&self, case: &TestCase) -> anyhow::Result<i64>;

    /// Writes a run and its cases atomically; either all rows land or none do.
    /// Cases are attached to the new run id. Returns that id.
    async fn insert_run_with_cases(&self, run: &SuiteRun, cases: &[TestCase])
        -> anyhow::Result<i64>;

    /// Most recent first.
    async fn get_recent_runs(&self, limit: u32) -> anyhow::Result<Vec<SuiteRun>>;
    async fn get_run_by_id(&self, id: i64) -> anyhow::Result<Option<SuiteRun>>;
    async fn get_test_cases_by_run_id(&self, run_id: i64) -> anyhow::Result<Vec<TestCase>>;

    /// Mean of each numeric run field over runs at or after `since`.
    async fn rolling_baseline_since(&self, since: DateTime<Utc>)
        -> anyhow::Result<RollingBaseline>;

    async fn get_rolling_baseline(&self, window_days: u32) -> anyhow::Result<RollingBaseline> {
        let since = Utc::now() - chrono::Duration::days(i64::from(window_days));
        self.rolling_baseline_since(since).await
    }

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn list_config(&self) -> anyhow::Result<Vec<(String, String)>>;

    async fn insert_submission(&self, sub: &RunSubmission) -> anyhow::Result<i64>;
    async fn submission_scores_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubmissionScore>>;

    /// Takes the single suite-run lock shared by every process on this store.
    ///
    /// Succeeds when the lock is free, already held by `holder`, or was last
    /// claimed before `stale_before`. Returns false otherwise.
    async fn try_acquire_run_lock(
        &self,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// No-op unless `holder` owns the lock.
    async fn release_run_lock(&self, holder: &str) -> anyhow::Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Opens the backend named in the config and makes sure its schema exists.
pub async fn open_repository(
    cfg: &crate::config::StorageConfig,
) -> anyhow::Result<Arc<dyn RunRepository>> {
    use crate::config::StorageBackend;

    match cfg.backend {
        StorageBackend::Sqlite => {
            let store = if cfg.path.as_os_str() == ":memory:" {
                Store::memory()?
            } else {
                if let Some(parent) = cfg.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Store::open(&cfg.path)?
            };
            store.init_schema()?;
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let url = cfg.resolve_url()?;
            let store = PgStore::connect(&url, cfg.max_connections).await?;
            store.init_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn flags_to_json(flags: &crate::model::FlagSet) -> anyhow::Result<String> {
    Ok(serde_json::to_string(flags)?)
}

pub(crate) fn flags_from_json(raw: &str) -> anyhow::Result<crate::model::FlagSet> {
    if raw.trim().is_empty() {
        return Ok(Default::default());
    }
    Ok(serde_json::from_str(raw)?)
}
