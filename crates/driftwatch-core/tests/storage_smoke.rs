use chrono::{Duration, Utc};
use driftwatch_core::model::{now_utc, FlagSet, RegressionFlag, RunStatus, SuiteRun, TestCase};
use driftwatch_core::storage::{RunRepository, Store};
use driftwatch_core::submission::{RunSubmission, TestDetail};
use tempfile::tempdir;

fn run_at(ts: chrono::DateTime<Utc>, correctness: u32, tps: f64) -> SuiteRun {
    SuiteRun {
        id: 0,
        timestamp: ts,
        model_id: "claude-sonnet-4-5".into(),
        provider: "anthropic".into(),
        region: Some("eu-west-1".into()),
        temperature: 0.0,
        top_p: 1.0,
        max_tokens: 1024,
        suite_version: "2025.1".into(),
        correctness_score: correctness,
        correctness_total: 4,
        ttft_median: Some(0.4),
        ttft_p95: Some(0.9),
        latency_median: Some(8.0),
        latency_p95: Some(10.0),
        tokens_per_sec_median: Some(tps),
        tokens_per_sec_p95: Some(tps * 1.2),
        output_tokens_median: Some(400.0),
        error_rate: 0.0,
        refusal_rate: 0.0,
        status: RunStatus::Green,
        flags: FlagSet::new(),
    }
}

fn case(run_id: i64, replicate: u32) -> TestCase {
    TestCase {
        id: 0,
        run_id,
        prompt_id: "P1".into(),
        prompt_version: "1".into(),
        replicate_number: replicate,
        request_id: format!("msg_{}", replicate),
        success: replicate == 1,
        score: Some(u8::from(replicate == 1)),
        ttft: Some(0.3),
        total_latency: 1.5,
        output_tokens: 12,
        tokens_per_sec: 8.0,
        finish_reason: Some("end_turn".into()),
        output_hash: "abc".into(),
        raw_output: None,
        error_message: None,
        refusal: replicate == 2,
    }
}

#[tokio::test]
async fn run_round_trip_with_flags() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Store::open(&dir.path().join("dw.db"))?;
    store.init_schema()?;

    let mut run = run_at(now_utc(), 3, 50.0);
    run.flags.insert(RegressionFlag::QualityRegression);
    run.flags.insert(RegressionFlag::OutputCapDetected);
    run.status = RunStatus::Red;
    run.ttft_median = None;

    let id = store.insert_run(&run).await?;
    let loaded = store.get_run_by_id(id).await?.expect("run present");

    run.id = id;
    assert_eq!(loaded, run);
    assert!(store.get_run_by_id(id + 100).await?.is_none());

    store.insert_test_case(&case(id, 1)).await?;
    store.insert_test_case(&case(id, 2)).await?;
    let cases = store.get_test_cases_by_run_id(id).await?;
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].replicate_number, 1);
    assert_eq!(cases[1].score, Some(0));
    assert!(cases[1].refusal);
    Ok(())
}

#[tokio::test]
async fn recent_runs_are_newest_first() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let now = now_utc();
    for h in [3, 1, 2] {
        store.insert_run(&run_at(now - Duration::hours(h), 4, 50.0)).await?;
    }
    let runs = store.get_recent_runs(2).await?;
    assert_eq!(runs.len(), 2);
    assert!(runs[0].timestamp > runs[1].timestamp);
    assert_eq!(runs[0].timestamp, now - Duration::hours(1));
    Ok(())
}

#[tokio::test]
async fn baseline_only_covers_the_window() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let empty = store.get_rolling_baseline(7).await?;
    assert_eq!(empty.run_count, 0);
    assert_eq!(empty.tokens_per_sec_median, 0.0);

    let now = now_utc();
    store.insert_run(&run_at(now - Duration::days(1), 4, 40.0)).await?;
    store.insert_run(&run_at(now - Duration::days(2), 2, 60.0)).await?;
    store.insert_run(&run_at(now - Duration::days(10), 0, 1000.0)).await?;

    let b = store.get_rolling_baseline(7).await?;
    assert_eq!(b.run_count, 2);
    assert_eq!(b.correctness_score, 3.0);
    assert_eq!(b.tokens_per_sec_median, 50.0);
    assert_eq!(b.latency_p95, 10.0);
    Ok(())
}

#[tokio::test]
async fn deleting_a_run_cascades_to_cases() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let id = store.insert_run(&run_at(now_utc(), 4, 50.0)).await?;
    store.insert_test_case(&case(id, 1)).await?;
    assert_eq!(store.count_rows("test_cases")?, 1);

    {
        let conn = store.conn.lock().unwrap();
        conn.execute("DELETE FROM runs WHERE id = ?1", [id])?;
    }
    assert_eq!(store.count_rows("test_cases")?, 0);
    Ok(())
}

#[tokio::test]
async fn case_requires_existing_run() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    assert!(store.insert_test_case(&case(999, 1)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn config_upserts() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    assert_eq!(store.get_config("timezone").await?, None);
    store.set_config("timezone", "UTC").await?;
    store.set_config("timezone", "Europe/Amsterdam").await?;
    store.set_config("cache_busting", "true").await?;
    assert_eq!(
        store.get_config("timezone").await?.as_deref(),
        Some("Europe/Amsterdam")
    );
    assert_eq!(
        store.list_config().await?,
        vec![
            ("cache_busting".to_string(), "true".to_string()),
            ("timezone".to_string(), "Europe/Amsterdam".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn reopening_runs_migrations_idempotently() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("dw.db");
    {
        let store = Store::open(&path)?;
        store.init_schema()?;
        store.insert_run(&run_at(now_utc(), 4, 50.0)).await?;
    }
    let store = Store::open(&path)?;
    store.init_schema()?;
    assert_eq!(store.get_recent_runs(10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn submissions_feed_scores_by_effective_value() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let mut sub = RunSubmission {
        anonymous_user_id: "u1".into(),
        claude_version: "m".into(),
        test_score: 60,
        continuous_score: None,
        total_tests: 5,
        ttft_ms: None,
        tokens_per_second: None,
        avg_output_length: None,
        error_rate: 0.0,
        region: None,
        test_details: vec![TestDetail {
            test_id: "P1#1".into(),
            test_name: "palindrome".into(),
            passed: true,
            score: Some(100.0),
            response_time_ms: Some(900.0),
            output_quality: None,
            metrics: None,
            error_message: None,
        }],
    };
    store.insert_submission(&sub).await?;
    sub.continuous_score = Some(72.5);
    sub.region = Some("eu".into());
    store.insert_submission(&sub).await?;

    let mut scores: Vec<f64> = store
        .submission_scores_since(Utc::now() - Duration::days(7))
        .await?
        .into_iter()
        .map(|s| s.score)
        .collect();
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(scores, vec![60.0, 72.5]);
    Ok(())
}

#[tokio::test]
async fn run_with_cases_is_all_or_nothing() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    {
        let conn = store.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_second BEFORE INSERT ON test_cases
             WHEN NEW.replicate_number = 2
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )?;
    }

    let run = run_at(now_utc(), 4, 50.0);
    let cases = vec![case(0, 1), case(0, 2), case(0, 3)];
    let err = store
        .insert_run_with_cases(&run, &cases)
        .await
        .expect_err("second case rejected");
    assert!(format!("{err:#}").contains("P1#2"));
    assert_eq!(store.count_rows("runs")?, 0);
    assert_eq!(store.count_rows("test_cases")?, 0);
    assert_eq!(store.get_rolling_baseline(7).await?.run_count, 0);

    {
        let conn = store.conn.lock().unwrap();
        conn.execute_batch("DROP TRIGGER reject_second;")?;
    }
    let id = store.insert_run_with_cases(&run, &cases).await?;
    let stored = store.get_test_cases_by_run_id(id).await?;
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|c| c.run_id == id));
    Ok(())
}

#[tokio::test]
async fn run_lock_is_exclusive_until_released_or_stale() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let long_ago = Utc::now() - Duration::hours(1);

    assert!(store.try_acquire_run_lock("daemon", long_ago).await?);
    assert!(store.try_acquire_run_lock("daemon", long_ago).await?);
    assert!(!store.try_acquire_run_lock("manual", long_ago).await?);

    // Releasing someone else's claim does nothing.
    store.release_run_lock("manual").await?;
    assert!(!store.try_acquire_run_lock("manual", long_ago).await?);

    store.release_run_lock("daemon").await?;
    assert!(store.try_acquire_run_lock("manual", long_ago).await?);

    // A claim older than the cutoff is taken over.
    let cutoff = Utc::now() + Duration::seconds(1);
    assert!(store.try_acquire_run_lock("daemon", cutoff).await?);
    assert_eq!(store.count_rows("run_lock")?, 1);
    Ok(())
}
