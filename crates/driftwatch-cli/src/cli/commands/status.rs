use super::{exit_codes, open};
use crate::cli::args::{HistoryArgs, ShowArgs, StatusArgs};
use driftwatch_core::report::console::{print_history, print_run_summary};
use driftwatch_core::report::StatusSnapshot;
use std::path::Path;

pub async fn status(args: StatusArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ws = open(config_path, strict).await?;
    let snapshot = StatusSnapshot::load(ws.store.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(exit_codes::OK);
    }

    match (&snapshot.last_run, snapshot.correctness_score, snapshot.correctness_total) {
        (Some(at), Some(score), Some(total)) => {
            println!("{}  run #{}  at {}", snapshot.status, snapshot.run_id.unwrap_or_default(), at);
            println!("correctness {}/{}", score, total);
            if !snapshot.flags.is_empty() {
                println!("flags: {}", snapshot.flags.join(", "));
            }
        }
        _ => println!("{}  no runs recorded yet", snapshot.status),
    }
    Ok(exit_codes::OK)
}

pub async fn history(args: HistoryArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ws = open(config_path, strict).await?;
    let runs = ws.store.get_recent_runs(args.limit).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        print_history(&runs);
    }
    Ok(exit_codes::OK)
}

pub async fn show(args: ShowArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ws = open(config_path, strict).await?;
    let Some(run) = ws.store.get_run_by_id(args.run_id).await? else {
        eprintln!("run {} not found", args.run_id);
        return Ok(exit_codes::TEST_FAILED);
    };
    let cases = ws.store.get_test_cases_by_run_id(run.id).await?;

    if args.json {
        let doc = serde_json::json!({ "run": run, "cases": cases });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_run_summary(&run, &cases);
    }
    Ok(exit_codes::OK)
}
