use super::{build_catalog, build_client, exit_codes, open};
use crate::cli::args::{DaemonArgs, RunArgs};
use driftwatch_core::engine::{RunMetadata, RunnerOptions, SuiteRunner};
use driftwatch_core::errors::RunInProgress;
use driftwatch_core::model::RunStatus;
use driftwatch_core::report::console::print_run_summary;
use driftwatch_core::scheduler::Scheduler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub async fn run(args: RunArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ctx = open(config_path, strict).await?;
    let catalog = Arc::new(build_catalog(&ctx.cfg)?);
    let client = build_client(&ctx.cfg, args.dry_run)?;

    let mut meta = RunMetadata::from_endpoint(&ctx.cfg.endpoint);
    let mut options = RunnerOptions::from(&ctx.cfg.runner);
    if args.dry_run {
        meta.provider = client.provider_name().to_string();
        options.pacing = Duration::ZERO;
    }
    if args.no_wait {
        options.lock_wait = Duration::ZERO;
    }

    let runner = SuiteRunner::new(catalog, client, ctx.store.clone(), meta, options);
    let run = match runner.run_suite().await {
        Ok(run) => run,
        Err(e) if e.downcast_ref::<RunInProgress>().is_some() => {
            eprintln!("error: {e}");
            return Ok(exit_codes::RUN_IN_PROGRESS);
        }
        Err(e) => return Err(e),
    };
    let cases = ctx.store.get_test_cases_by_run_id(run.id).await?;

    print_run_summary(&run, &cases);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    }

    Ok(if run.status == RunStatus::Red {
        exit_codes::TEST_FAILED
    } else {
        exit_codes::OK
    })
}

pub async fn daemon(args: DaemonArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ctx = open(config_path, strict).await?;
    let catalog = Arc::new(build_catalog(&ctx.cfg)?);
    let client = build_client(&ctx.cfg, false)?;
    let runner = Arc::new(SuiteRunner::new(
        catalog,
        client,
        ctx.store.clone(),
        RunMetadata::from_endpoint(&ctx.cfg.endpoint),
        RunnerOptions::from(&ctx.cfg.runner),
    ));
    let scheduler = Arc::new(Scheduler::new(runner, ctx.store.clone()));

    let (tx, rx) = broadcast::channel(1);
    let mut initial_stop = tx.subscribe();
    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run(rx).await }
    });
    let signals = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, stopping scheduler"),
            Err(e) => tracing::error!(error = %e, "failed to listen for interrupt, stopping"),
        }
        let _ = tx.send(());
    });

    if args.run_now {
        match scheduler.run_now_until(&mut initial_stop).await {
            Some(Ok(run)) => {
                tracing::info!(run_id = run.id, status = %run.status, "initial run complete")
            }
            Some(Err(e)) => tracing::error!(error = %e, "initial run failed"),
            None => {}
        }
    }

    handle.await?;
    signals.abort();
    Ok(exit_codes::OK)
}
