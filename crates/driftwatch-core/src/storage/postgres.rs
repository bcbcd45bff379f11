use super::{flags_from_json, flags_to_json, RunRepository};
use crate::model::{RollingBaseline, RunStatus, SuiteRun, TestCase};
use crate::submission::{RunSubmission, SubmissionScore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};

/// Hosted relational store. Same tables and semantics as the sqlite `Store`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

const RUN_COLUMNS: &str = "id, timestamp, model_id, provider, region, temperature, top_p, max_tokens,
    suite_version, correctness_score, correctness_total, ttft_median, ttft_p95, latency_median,
    latency_p95, tokens_per_sec_median, tokens_per_sec_p95, output_tokens_median, error_rate,
    refusal_rate, status, flags";

const CASE_COLUMNS: &str = "id, run_id, prompt_id, prompt_version, replicate_number, request_id,
    success, score, ttft, total_latency, output_tokens, tokens_per_sec, finish_reason,
    output_hash, raw_output, error_message, refusal";

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        for stmt in crate::storage::schema::PG_DDL {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("apply postgres schema")?;
        }
        Ok(())
    }
}

fn to_i32(v: u32, field: &str) -> anyhow::Result<i32> {
    i32::try_from(v).with_context(|| format!("{} out of range for postgres INTEGER", field))
}

fn run_from_row(row: &PgRow) -> anyhow::Result<SuiteRun> {
    let status_raw: String = row.try_get("status")?;
    let status = RunStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("unknown status {}", status_raw))?;
    let flags_raw: String = row.try_get("flags")?;

    Ok(SuiteRun {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        model_id: row.try_get("model_id")?,
        provider: row.try_get("provider")?,
        region: row.try_get("region")?,
        temperature: row.try_get("temperature")?,
        top_p: row.try_get("top_p")?,
        max_tokens: u32::try_from(row.try_get::<i32, _>("max_tokens")?)?,
        suite_version: row.try_get("suite_version")?,
        correctness_score: u32::try_from(row.try_get::<i32, _>("correctness_score")?)?,
        correctness_total: u32::try_from(row.try_get::<i32, _>("correctness_total")?)?,
        ttft_median: row.try_get("ttft_median")?,
        ttft_p95: row.try_get("ttft_p95")?,
        latency_median: row.try_get("latency_median")?,
        latency_p95: row.try_get("latency_p95")?,
        tokens_per_sec_median: row.try_get("tokens_per_sec_median")?,
        tokens_per_sec_p95: row.try_get("tokens_per_sec_p95")?,
        output_tokens_median: row.try_get("output_tokens_median")?,
        error_rate: row.try_get("error_rate")?,
        refusal_rate: row.try_get("refusal_rate")?,
        status,
        flags: flags_from_json(&flags_raw)?,
    })
}

fn case_from_row(row: &PgRow) -> anyhow::Result<TestCase> {
    let score: Option<i16> = row.try_get("score")?;
    Ok(TestCase {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        prompt_id: row.try_get("prompt_id")?,
        prompt_version: row.try_get("prompt_version")?,
        replicate_number: u32::try_from(row.try_get::<i32, _>("replicate_number")?)?,
        request_id: row.try_get("request_id")?,
        success: row.try_get("success")?,
        score: score.map(u8::try_from).transpose()?,
        ttft: row.try_get("ttft")?,
        total_latency: row.try_get("total_latency")?,
        output_tokens: u32::try_from(row.try_get::<i32, _>("output_tokens")?)?,
        tokens_per_sec: row.try_get("tokens_per_sec")?,
        finish_reason: row.try_get("finish_reason")?,
        output_hash: row.try_get("output_hash")?,
        raw_output: row.try_get("raw_output")?,
        error_message: row.try_get("error_message")?,
        refusal: row.try_get("refusal")?,
    })
}

async fn insert_run_row(conn: &mut PgConnection, run: &SuiteRun) -> anyhow::Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO runs(timestamp, model_id, provider, region, temperature, top_p, max_tokens,
            suite_version, correctness_score, correctness_total, ttft_median, ttft_p95,
            latency_median, latency_p95, tokens_per_sec_median, tokens_per_sec_p95,
            output_tokens_median, error_rate, refusal_rate, status, flags)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
         RETURNING id",
    )
    .bind(run.timestamp)
    .bind(&run.model_id)
    .bind(&run.provider)
    .bind(&run.region)
    .bind(run.temperature)
    .bind(run.top_p)
    .bind(to_i32(run.max_tokens, "max_tokens")?)
    .bind(&run.suite_version)
    .bind(to_i32(run.correctness_score, "correctness_score")?)
    .bind(to_i32(run.correctness_total, "correctness_total")?)
    .bind(run.ttft_median)
    .bind(run.ttft_p95)
    .bind(run.latency_median)
    .bind(run.latency_p95)
    .bind(run.tokens_per_sec_median)
    .bind(run.tokens_per_sec_p95)
    .bind(run.output_tokens_median)
    .bind(run.error_rate)
    .bind(run.refusal_rate)
    .bind(run.status.as_str())
    .bind(flags_to_json(&run.flags)?)
    .fetch_one(&mut *conn)
    .await
    .context("insert run")?;
    Ok(id)
}

async fn insert_case_row(
    conn: &mut PgConnection,
    run_id: i64,
    case: &TestCase,
) -> anyhow::Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO test_cases(run_id, prompt_id, prompt_version, replicate_number, request_id,
            success, score, ttft, total_latency, output_tokens, tokens_per_sec, finish_reason,
            output_hash, raw_output, error_message, refusal)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
         RETURNING id",
    )
    .bind(run_id)
    .bind(&case.prompt_id)
    .bind(&case.prompt_version)
    .bind(to_i32(case.replicate_number, "replicate_number")?)
    .bind(&case.request_id)
    .bind(case.success)
    .bind(case.score.map(i16::from))
    .bind(case.ttft)
    .bind(case.total_latency)
    .bind(to_i32(case.output_tokens, "output_tokens")?)
    .bind(case.tokens_per_sec)
    .bind(&case.finish_reason)
    .bind(&case.output_hash)
    .bind(&case.raw_output)
    .bind(&case.error_message)
    .bind(case.refusal)
    .fetch_one(&mut *conn)
    .await
    .context("insert test case")?;
    Ok(id)
}

#[async_trait]
impl RunRepository for PgStore {
    async fn insert_run(&self, run: &SuiteRun) -> anyhow::Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_run_row(&mut conn, run).await
    }

    async fn insert_test_case(&self, case: &TestCase) -> anyhow::Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_case_row(&mut conn, case.run_id, case).await
    }

    async fn insert_run_with_cases(
        &self,
        run: &SuiteRun,
        cases: &[TestCase],
    ) -> anyhow::Result<i64> {
        // Dropped without commit (error or cancellation) rolls back.
        let mut tx = self.pool.begin().await?;
        let run_id = insert_run_row(&mut tx, run).await?;
        for case in cases {
            insert_case_row(&mut tx, run_id, case)
                .await
                .with_context(|| format!("case {}#{}", case.prompt_id, case.replicate_number))?;
        }
        tx.commit().await?;
        Ok(run_id)
    }

    async fn get_recent_runs(&self, limit: u32) -> anyhow::Result<Vec<SuiteRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs ORDER BY timestamp DESC, id DESC LIMIT $1",
            RUN_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn get_run_by_id(&self, id: i64) -> anyhow::Result<Option<SuiteRun>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = $1", RUN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn get_test_cases_by_run_id(&self, run_id: i64) -> anyhow::Result<Vec<TestCase>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM test_cases WHERE run_id = $1 ORDER BY id ASC",
            CASE_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(case_from_row).collect()
    }

    async fn rolling_baseline_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<RollingBaseline> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS run_count,
                COALESCE(AVG(correctness_score)::float8, 0) AS correctness_score,
                COALESCE(AVG(ttft_median), 0) AS ttft_median,
                COALESCE(AVG(ttft_p95), 0) AS ttft_p95,
                COALESCE(AVG(latency_median), 0) AS latency_median,
                COALESCE(AVG(latency_p95), 0) AS latency_p95,
                COALESCE(AVG(tokens_per_sec_median), 0) AS tokens_per_sec_median,
                COALESCE(AVG(tokens_per_sec_p95), 0) AS tokens_per_sec_p95,
                COALESCE(AVG(output_tokens_median), 0) AS output_tokens_median,
                COALESCE(AVG(error_rate), 0) AS error_rate,
                COALESCE(AVG(refusal_rate), 0) AS refusal_rate
             FROM runs WHERE timestamp >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(RollingBaseline {
            run_count: u32::try_from(row.try_get::<i64, _>("run_count")?)?,
            correctness_score: row.try_get("correctness_score")?,
            ttft_median: row.try_get("ttft_median")?,
            ttft_p95: row.try_get("ttft_p95")?,
            latency_median: row.try_get("latency_median")?,
            latency_p95: row.try_get("latency_p95")?,
            tokens_per_sec_median: row.try_get("tokens_per_sec_median")?,
            tokens_per_sec_p95: row.try_get("tokens_per_sec_p95")?,
            output_tokens_median: row.try_get("output_tokens_median")?,
            error_rate: row.try_get("error_rate")?,
            refusal_rate: row.try_get("refusal_rate")?,
        })
    }

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO config(key, value, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT(key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_config(&self) -> anyhow::Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM config ORDER BY key")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn insert_submission(&self, sub: &RunSubmission) -> anyhow::Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO submissions(created_at, anonymous_user_id, model, test_score, continuous_score,
                total_tests, ttft_ms, tokens_per_second, avg_output_length, error_rate, region,
                test_details_json)
             VALUES (NOW(), $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING id",
        )
        .bind(&sub.anonymous_user_id)
        .bind(&sub.claude_version)
        .bind(i32::try_from(sub.test_score)?)
        .bind(sub.continuous_score)
        .bind(i32::try_from(sub.total_tests)?)
        .bind(sub.ttft_ms)
        .bind(sub.tokens_per_second)
        .bind(sub.avg_output_length)
        .bind(sub.error_rate)
        .bind(&sub.region)
        .bind(serde_json::to_string(&sub.test_details)?)
        .fetch_one(&self.pool)
        .await
        .context("insert submission")?;
        Ok(id)
    }

    async fn submission_scores_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubmissionScore>> {
        let rows: Vec<(f64, Option<String>, String)> = sqlx::query_as(
            "SELECT COALESCE(continuous_score, test_score::float8), region, anonymous_user_id
             FROM submissions WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(score, region, anonymous_user_id)| SubmissionScore {
                score,
                region,
                anonymous_user_id,
            })
            .collect())
    }

    async fn try_acquire_run_lock(
        &self,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "INSERT INTO run_lock(id, holder, acquired_at) VALUES (1, $1, NOW())
             ON CONFLICT(id) DO UPDATE SET holder = EXCLUDED.holder, acquired_at = EXCLUDED.acquired_at
             WHERE run_lock.holder = EXCLUDED.holder OR run_lock.acquired_at < $2",
        )
        .bind(holder)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .context("acquire run lock")?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_run_lock(&self, holder: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM run_lock WHERE id = 1 AND holder = $1")
            .bind(holder)
            .execute(&self.pool)
            .await
            .context("release run lock")?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
