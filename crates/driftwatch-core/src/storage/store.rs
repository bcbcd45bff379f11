use super::{flags_from_json, flags_to_json, RunRepository};
use crate::model::{RollingBaseline, RunStatus, SuiteRun, TestCase};
use crate::submission::{RunSubmission, SubmissionScore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Embedded single-file store.
#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

const RUN_COLUMNS: &str = "id, timestamp, model_id, provider, region, temperature, top_p, max_tokens,
    suite_version, correctness_score, correctness_total, ttft_median, ttft_p95, latency_median,
    latency_p95, tokens_per_sec_median, tokens_per_sec_p95, output_tokens_median, error_rate,
    refusal_rate, status, flags";

const CASE_COLUMNS: &str = "id, run_id, prompt_id, prompt_version, replicate_number, request_id,
    success, score, ttft, total_latency, output_tokens, tokens_per_sec, finish_reason,
    output_hash, raw_output, error_message, refusal";

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // A daemon and a manual run may share the file.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection mutex poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        migrate_v02(&conn)?;
        Ok(())
    }

    pub fn insert_run_sync(&self, run: &SuiteRun) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        insert_run_row(&conn, run)
    }

    pub fn insert_test_case_sync(&self, case: &TestCase) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        insert_case_row(&conn, case.run_id, case)
    }

    /// Writes the run and all of its cases in one transaction. Each case is
    /// stored under the new run id regardless of its own `run_id`.
    pub fn insert_run_with_cases_sync(
        &self,
        run: &SuiteRun,
        cases: &[TestCase],
    ) -> anyhow::Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let run_id = insert_run_row(&tx, run)?;
        for case in cases {
            insert_case_row(&tx, run_id, case).with_context(|| {
                format!("case {}#{}", case.prompt_id, case.replicate_number)
            })?;
        }
        tx.commit()?;
        Ok(run_id)
    }

    pub fn run_lock_acquire(
        &self,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT INTO run_lock(id, holder, acquired_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at
                 WHERE run_lock.holder = excluded.holder OR run_lock.acquired_at < ?3",
                params![holder, fmt_ts(&Utc::now()), fmt_ts(&stale_before)],
            )
            .context("acquire run lock")?;
        Ok(changed == 1)
    }

    pub fn run_lock_release(&self, holder: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM run_lock WHERE id = 1 AND holder = ?1",
            params![holder],
        )
        .context("release run lock")?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: u32) -> anyhow::Result<Vec<SuiteRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY timestamp DESC, id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn run_by_id(&self, id: i64) -> anyhow::Result<Option<SuiteRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS))?;
        Ok(stmt.query_row(params![id], run_from_row).optional()?)
    }

    pub fn test_cases_for_run(&self, run_id: i64) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM test_cases WHERE run_id = ?1 ORDER BY id ASC",
            CASE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![run_id], case_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn baseline_since(&self, since: DateTime<Utc>) -> anyhow::Result<RollingBaseline> {
        let conn = self.lock()?;
        let baseline = conn.query_row(
            "SELECT COUNT(*),
                COALESCE(AVG(correctness_score), 0),
                COALESCE(AVG(ttft_median), 0),
                COALESCE(AVG(ttft_p95), 0),
                COALESCE(AVG(latency_median), 0),
                COALESCE(AVG(latency_p95), 0),
                COALESCE(AVG(tokens_per_sec_median), 0),
                COALESCE(AVG(tokens_per_sec_p95), 0),
                COALESCE(AVG(output_tokens_median), 0),
                COALESCE(AVG(error_rate), 0),
                COALESCE(AVG(refusal_rate), 0)
             FROM runs WHERE timestamp >= ?1",
            params![fmt_ts(&since)],
            |r| {
                Ok(RollingBaseline {
                    run_count: r.get(0)?,
                    correctness_score: r.get(1)?,
                    ttft_median: r.get(2)?,
                    ttft_p95: r.get(3)?,
                    latency_median: r.get(4)?,
                    latency_p95: r.get(5)?,
                    tokens_per_sec_median: r.get(6)?,
                    tokens_per_sec_p95: r.get(7)?,
                    output_tokens_median: r.get(8)?,
                    error_rate: r.get(9)?,
                    refusal_rate: r.get(10)?,
                })
            },
        )?;
        Ok(baseline)
    }

    pub fn config_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn config_set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO config(key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, value, fmt_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn config_list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn submission_insert(&self, sub: &RunSubmission) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO submissions(created_at, anonymous_user_id, model, test_score, continuous_score,
                total_tests, ttft_ms, tokens_per_second, avg_output_length, error_rate, region,
                test_details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                fmt_ts(&Utc::now()),
                sub.anonymous_user_id,
                sub.claude_version,
                sub.test_score,
                sub.continuous_score,
                sub.total_tests,
                sub.ttft_ms,
                sub.tokens_per_second,
                sub.avg_output_length,
                sub.error_rate,
                sub.region,
                serde_json::to_string(&sub.test_details)?,
            ],
        )
        .context("insert submission")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn submission_scores(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<SubmissionScore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(continuous_score, test_score), region, anonymous_user_id
             FROM submissions WHERE created_at >= ?1",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(&since)], |r| {
                Ok(SubmissionScore {
                    score: r.get(0)?,
                    region: r.get(1)?,
                    anonymous_user_id: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        if !["runs", "test_cases", "config", "submissions", "run_lock"].contains(&table) {
            anyhow::bail!("Invalid table name for count_rows: {}", table);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

#[async_trait]
impl RunRepository for Store {
    async fn insert_run(&self, run: &SuiteRun) -> anyhow::Result<i64> {
        self.insert_run_sync(run)
    }

    async fn insert_test_case(&self, case: &TestCase) -> anyhow::Result<i64> {
        self.insert_test_case_sync(case)
    }

    async fn insert_run_with_cases(
        &self,
        run: &SuiteRun,
        cases: &[TestCase],
    ) -> anyhow::Result<i64> {
        self.insert_run_with_cases_sync(run, cases)
    }

    async fn get_recent_runs(&self, limit: u32) -> anyhow::Result<Vec<SuiteRun>> {
        self.recent_runs(limit)
    }

    async fn get_run_by_id(&self, id: i64) -> anyhow::Result<Option<SuiteRun>> {
        self.run_by_id(id)
    }

    async fn get_test_cases_by_run_id(&self, run_id: i64) -> anyhow::Result<Vec<TestCase>> {
        self.test_cases_for_run(run_id)
    }

    async fn rolling_baseline_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<RollingBaseline> {
        self.baseline_since(since)
    }

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.config_get(key)
    }

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.config_set(key, value)
    }

    async fn list_config(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.config_list()
    }

    async fn insert_submission(&self, sub: &RunSubmission) -> anyhow::Result<i64> {
        self.submission_insert(sub)
    }

    async fn submission_scores_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<SubmissionScore>> {
        self.submission_scores(since)
    }

    async fn try_acquire_run_lock(
        &self,
        holder: &str,
        stale_before: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.run_lock_acquire(holder, stale_before)
    }

    async fn release_run_lock(&self, holder: &str) -> anyhow::Result<()> {
        self.run_lock_release(holder)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

fn insert_run_row(conn: &Connection, run: &SuiteRun) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO runs(timestamp, model_id, provider, region, temperature, top_p, max_tokens,
            suite_version, correctness_score, correctness_total, ttft_median, ttft_p95,
            latency_median, latency_p95, tokens_per_sec_median, tokens_per_sec_p95,
            output_tokens_median, error_rate, refusal_rate, status, flags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            fmt_ts(&run.timestamp),
            run.model_id,
            run.provider,
            run.region,
            run.temperature,
            run.top_p,
            run.max_tokens,
            run.suite_version,
            run.correctness_score,
            run.correctness_total,
            run.ttft_median,
            run.ttft_p95,
            run.latency_median,
            run.latency_p95,
            run.tokens_per_sec_median,
            run.tokens_per_sec_p95,
            run.output_tokens_median,
            run.error_rate,
            run.refusal_rate,
            run.status.as_str(),
            flags_to_json(&run.flags)?,
        ],
    )
    .context("insert run")?;
    Ok(conn.last_insert_rowid())
}

fn insert_case_row(conn: &Connection, run_id: i64, case: &TestCase) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO test_cases(run_id, prompt_id, prompt_version, replicate_number, request_id,
            success, score, ttft, total_latency, output_tokens, tokens_per_sec, finish_reason,
            output_hash, raw_output, error_message, refusal)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            run_id,
            case.prompt_id,
            case.prompt_version,
            case.replicate_number,
            case.request_id,
            case.success,
            case.score,
            case.ttft,
            case.total_latency,
            case.output_tokens,
            case.tokens_per_sec,
            case.finish_reason,
            case.output_hash,
            case.raw_output,
            case.error_message,
            case.refusal,
        ],
    )
    .context("insert test case")?;
    Ok(conn.last_insert_rowid())
}

// Fixed-width UTC timestamps sort lexicographically, which the window queries rely on.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SuiteRun> {
    let ts: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&ts)
        .map_err(|e| conversion_err(1, e))?
        .with_timezone(&Utc);

    let status_raw: String = row.get(20)?;
    let status = RunStatus::parse(&status_raw).ok_or_else(|| {
        conversion_err(
            20,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown status {}", status_raw),
            ),
        )
    })?;

    let flags_raw: String = row.get(21)?;
    let flags = flags_from_json(&flags_raw).map_err(|e| {
        conversion_err(
            21,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        )
    })?;

    Ok(SuiteRun {
        id: row.get(0)?,
        timestamp,
        model_id: row.get(2)?,
        provider: row.get(3)?,
        region: row.get(4)?,
        temperature: row.get(5)?,
        top_p: row.get(6)?,
        max_tokens: row.get(7)?,
        suite_version: row.get(8)?,
        correctness_score: row.get(9)?,
        correctness_total: row.get(10)?,
        ttft_median: row.get(11)?,
        ttft_p95: row.get(12)?,
        latency_median: row.get(13)?,
        latency_p95: row.get(14)?,
        tokens_per_sec_median: row.get(15)?,
        tokens_per_sec_p95: row.get(16)?,
        output_tokens_median: row.get(17)?,
        error_rate: row.get(18)?,
        refusal_rate: row.get(19)?,
        status,
        flags,
    })
}

fn case_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestCase> {
    Ok(TestCase {
        id: row.get(0)?,
        run_id: row.get(1)?,
        prompt_id: row.get(2)?,
        prompt_version: row.get(3)?,
        replicate_number: row.get(4)?,
        request_id: row.get(5)?,
        success: row.get(6)?,
        score: row.get(7)?,
        ttft: row.get(8)?,
        total_latency: row.get(9)?,
        output_tokens: row.get(10)?,
        tokens_per_sec: row.get(11)?,
        finish_reason: row.get(12)?,
        output_hash: row.get(13)?,
        raw_output: row.get(14)?,
        error_message: row.get(15)?,
        refusal: row.get(16)?,
    })
}

// v0.2: per-case refusal marker and the correctness denominator on runs
fn migrate_v02(conn: &Connection) -> anyhow::Result<()> {
    let cols = get_columns(conn, "runs")?;
    add_column_if_missing(
        conn,
        &cols,
        "runs",
        "correctness_total",
        "INTEGER NOT NULL DEFAULT 0",
    )?;
    let cols = get_columns(conn, "test_cases")?;
    add_column_if_missing(
        conn,
        &cols,
        "test_cases",
        "refusal",
        "INTEGER NOT NULL DEFAULT 0",
    )?;
    Ok(())
}

fn get_columns(
    conn: &Connection,
    table: &str,
) -> anyhow::Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = std::collections::HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &std::collections::HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> anyhow::Result<()> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}
