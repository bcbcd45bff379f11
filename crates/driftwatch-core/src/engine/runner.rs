use super::aggregate::{correctness_score, performance_summary, rates};
use crate::baseline::{calculate_status, detect, CurrentMetrics};
use crate::catalog::{PromptCatalog, PromptDefinition};
use crate::config::settings::OperatorSettings;
use crate::config::{EndpointConfig, RunnerConfig};
use crate::errors::RunInProgress;
use crate::model::{now_utc, ExecutionResult, PromptType, SuiteRun, TestCase, TestResult};
use crate::providers::llm::{EndpointClient, ExecuteOptions};
use crate::refusal::looks_like_refusal;
use crate::storage::RunRepository;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Output budget for correctness prompts; their answers are short by construction.
pub const CORRECTNESS_MAX_TOKENS: u32 = 256;

/// Interval between attempts on a busy suite-run lock.
const LOCK_POLL: Duration = Duration::from_secs(1);

/// Labels recorded on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub model_id: String,
    pub provider: String,
    pub region: Option<String>,
}

impl RunMetadata {
    pub fn from_endpoint(cfg: &EndpointConfig) -> Self {
        Self {
            model_id: cfg.model.clone(),
            provider: cfg.provider.clone(),
            region: cfg.region.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    pub pacing: Duration,
    pub baseline_window_days: u32,
    pub lock_wait: Duration,
    pub lock_stale_after: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for RunnerOptions {
    fn from(cfg: &RunnerConfig) -> Self {
        Self {
            pacing: Duration::from_millis(cfg.pacing_ms),
            baseline_window_days: cfg.baseline_window_days,
            lock_wait: Duration::from_secs(cfg.lock_wait_secs),
            lock_stale_after: Duration::from_secs(cfg.lock_stale_secs),
        }
    }
}

pub struct SuiteRunner {
    catalog: Arc<PromptCatalog>,
    client: Arc<dyn EndpointClient>,
    store: Arc<dyn RunRepository>,
    meta: RunMetadata,
    options: RunnerOptions,
    // Held for the whole suite so timed and manual runs never interleave.
    // The store-side lock extends this to other processes under `holder`.
    run_lock: Mutex<()>,
    holder: String,
}

impl SuiteRunner {
    pub fn new(
        catalog: Arc<PromptCatalog>,
        client: Arc<dyn EndpointClient>,
        store: Arc<dyn RunRepository>,
        meta: RunMetadata,
        options: RunnerOptions,
    ) -> Self {
        Self {
            catalog,
            client,
            store,
            meta,
            options,
            run_lock: Mutex::new(()),
            holder: format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
        }
    }

    pub fn catalog(&self) -> &PromptCatalog {
        &self.catalog
    }

    pub fn store(&self) -> Arc<dyn RunRepository> {
        self.store.clone()
    }

    /// Executes every prompt x replicate, scores, compares against the rolling
    /// baseline and persists the run with its cases.
    ///
    /// Endpoint failures are recorded per case; only storage errors fail the run.
    /// Fails with [`RunInProgress`] when another process keeps the suite lock
    /// past `lock_wait`.
    pub async fn run_suite(&self) -> anyhow::Result<SuiteRun> {
        let _guard = self.run_lock.lock().await;
        self.acquire_store_lock().await?;
        let res = self.run_locked().await;
        self.release_store_lock().await;
        res
    }

    /// Gives up this runner's claim on the shared lock, e.g. after a run was
    /// cancelled. Does nothing while a run is in flight in this process.
    pub async fn release_run_lock(&self) {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return;
        };
        self.release_store_lock().await;
    }

    async fn acquire_store_lock(&self) -> anyhow::Result<()> {
        let stale_after = chrono::Duration::from_std(self.options.lock_stale_after)
            .context("lock_stale_after out of range")?;
        let deadline = tokio::time::Instant::now() + self.options.lock_wait;
        let mut waiting = false;
        loop {
            let acquired = self
                .store
                .try_acquire_run_lock(&self.holder, now_utc() - stale_after)
                .await
                .context("acquire run lock")?;
            if acquired {
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(RunInProgress.into());
            }
            if !waiting {
                tracing::info!(
                    wait_secs = self.options.lock_wait.as_secs(),
                    "another suite run holds the lock; waiting"
                );
                waiting = true;
            }
            tokio::time::sleep(LOCK_POLL.min(deadline - now)).await;
        }
    }

    async fn release_store_lock(&self) {
        if let Err(e) = self.store.release_run_lock(&self.holder).await {
            tracing::warn!(error = %e, "failed to release run lock");
        }
    }

    async fn run_locked(&self) -> anyhow::Result<SuiteRun> {
        let settings = OperatorSettings::load(self.store.as_ref())
            .await
            .context("load operator settings")?;
        let timestamp = now_utc();

        tracing::info!(
            model = %self.meta.model_id,
            provider = self.client.provider_name(),
            suite_version = %self.catalog.suite_version(),
            catalog = %crate::fingerprint::catalog_fingerprint(&self.catalog),
            calls = self.catalog.total_calls(),
            cache_busting = settings.cache_busting,
            "suite run started"
        );

        let results = self.execute_all(&settings).await;

        let perf = performance_summary(&results);
        let (error_rate, refusal_rate) = rates(&results);
        let mut run = SuiteRun {
            id: 0,
            timestamp,
            model_id: self.meta.model_id.clone(),
            provider: self.meta.provider.clone(),
            region: self.meta.region.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            suite_version: self.catalog.suite_version().to_string(),
            correctness_score: correctness_score(&results),
            correctness_total: self.catalog.correctness_count(),
            ttft_median: perf.ttft_median,
            ttft_p95: perf.ttft_p95,
            latency_median: perf.latency_median,
            latency_p95: perf.latency_p95,
            tokens_per_sec_median: perf.tokens_per_sec_median,
            tokens_per_sec_p95: perf.tokens_per_sec_p95,
            output_tokens_median: perf.output_tokens_median,
            error_rate,
            refusal_rate,
            status: crate::model::RunStatus::Green,
            flags: Default::default(),
        };

        // Read before insert so the run is never part of its own baseline.
        let baseline = self
            .store
            .get_rolling_baseline(self.options.baseline_window_days)
            .await
            .context("load rolling baseline")?;
        run.flags = detect(&CurrentMetrics::from(&run), &baseline);
        run.status = calculate_status(&run.flags);

        let cases: Vec<TestCase> = results
            .iter()
            .map(|r| TestCase::from_result(0, r, settings.store_raw_outputs))
            .collect();
        run.id = self
            .store
            .insert_run_with_cases(&run, &cases)
            .await
            .context("persist run")?;

        tracing::info!(
            run_id = run.id,
            status = %run.status,
            flags = ?run.flags,
            correctness = run.correctness_score,
            correctness_total = run.correctness_total,
            error_rate = run.error_rate,
            baseline_runs = baseline.run_count,
            "suite run finished"
        );
        Ok(run)
    }

    async fn execute_all(&self, settings: &OperatorSettings) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(self.catalog.total_calls() as usize);
        let mut first = true;

        for prompt in self.catalog.prompts() {
            let opts = ExecuteOptions {
                max_tokens: match prompt.prompt_type {
                    PromptType::Correctness => CORRECTNESS_MAX_TOKENS,
                    PromptType::Performance => settings.max_tokens,
                },
                cache_busting: settings.cache_busting,
                temperature: settings.temperature,
                top_p: settings.top_p,
            };

            for replicate in 1..=prompt.replicate_count {
                if !first && !self.options.pacing.is_zero() {
                    tokio::time::sleep(self.options.pacing).await;
                }
                first = false;

                let exec = self.client.execute(&prompt.prompt_text, &opts).await;
                let result = score_result(prompt, replicate, exec);

                tracing::debug!(
                    prompt_id = %prompt.id,
                    replicate,
                    latency = result.execution.total_latency,
                    score = ?result.score,
                    error = ?result.execution.error,
                    "replicate finished"
                );
                if let Some(e) = &result.execution.error {
                    tracing::warn!(prompt_id = %prompt.id, replicate, error = %e, "endpoint call failed");
                }
                results.push(result);
            }
        }
        results
    }
}

fn score_result(prompt: &PromptDefinition, replicate: u32, exec: ExecutionResult) -> TestResult {
    let (score, success) = if exec.is_error() {
        (Some(0), false)
    } else {
        match prompt.prompt_type {
            PromptType::Correctness => {
                let passed = match &prompt.scorer {
                    Some(scorer) => {
                        let r = scorer.score(&exec.output);
                        if let Some(reason) = &r.reason {
                            tracing::debug!(prompt_id = %prompt.id, scorer = scorer.name(), reason = %reason, "scored 0");
                        }
                        r.passed
                    }
                    None => !exec.output.trim().is_empty(),
                };
                (Some(u8::from(passed)), passed)
            }
            PromptType::Performance => (None, true),
        }
    };

    let refusal = !success && !exec.is_error() && looks_like_refusal(&exec.output);

    TestResult {
        prompt_id: prompt.id.clone(),
        prompt_version: prompt.version.clone(),
        prompt_type: prompt.prompt_type,
        replicate_number: replicate,
        execution: exec,
        score,
        success,
        refusal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EndpointError, EndpointErrorKind};
    use crate::scoring_api::{ScoreResult, Scorer};

    struct Contains(&'static str);

    impl Scorer for Contains {
        fn name(&self) -> &'static str {
            "contains"
        }
        fn score(&self, output: &str) -> ScoreResult {
            if output.contains(self.0) {
                ScoreResult::pass()
            } else {
                ScoreResult::fail("missing")
            }
        }
    }

    fn ok(output: &str) -> ExecutionResult {
        ExecutionResult::completed(output.into(), Some(0.1), 1.0, 3, None, "r".into())
    }

    #[test]
    fn scorer_decides_correctness() {
        let p = PromptDefinition::correctness("P3", "math", "1", "17*23?", 1, Arc::new(Contains("391")));
        let pass = score_result(&p, 1, ok("It is 391."));
        assert_eq!((pass.score, pass.success, pass.refusal), (Some(1), true, false));
        let fail = score_result(&p, 2, ok("I can't do arithmetic."));
        assert_eq!((fail.score, fail.success, fail.refusal), (Some(0), false, true));
    }

    #[test]
    fn errors_score_zero_and_never_count_as_refusal() {
        let p = PromptDefinition::performance("P5", "essay", "1", "write", 1);
        let r = score_result(
            &p,
            1,
            ExecutionResult::failed(EndpointError::new(EndpointErrorKind::Timeout, "slow"), None),
        );
        assert_eq!((r.score, r.success, r.refusal), (Some(0), false, false));
    }

    #[test]
    fn performance_success_has_no_score() {
        let p = PromptDefinition::performance("P5", "essay", "1", "write", 1);
        let r = score_result(&p, 1, ok("I'm sorry, but here is the essay anyway"));
        assert_eq!((r.score, r.success, r.refusal), (None, true, false));
    }

    #[test]
    fn unscored_correctness_needs_output() {
        let mut p = PromptDefinition::correctness("P9", "x", "1", "q", 1, Arc::new(Contains("")));
        p.scorer = None;
        assert!(score_result(&p, 1, ok("something")).success);
        assert!(!score_result(&p, 1, ok("  ")).success);
    }
}
