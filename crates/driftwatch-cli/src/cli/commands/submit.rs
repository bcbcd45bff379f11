use super::{build_catalog, exit_codes, open};
use crate::cli::args::{ExportArgs, SubmitArgs};
use anyhow::Context;
use driftwatch_core::errors::SubmissionError;
use driftwatch_core::submission::{self, RunSubmission};
use std::io::Read;
use std::path::Path;

pub async fn submit(args: SubmitArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let raw = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?
    };
    let sub: RunSubmission = match serde_json::from_str(&raw) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: malformed submission: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let ws = open(config_path, strict).await?;
    match submission::submit(ws.store.as_ref(), &sub, &ws.cfg.submission).await {
        Ok(resp) => {
            println!("{}", serde_json::to_string_pretty(&resp)?);
            Ok(exit_codes::OK)
        }
        Err(SubmissionError::Invalid(errors)) => {
            for e in &errors {
                eprintln!("invalid: {e}");
            }
            Ok(exit_codes::CONFIG_ERROR)
        }
        Err(SubmissionError::Storage(e)) => Err(e),
    }
}

pub async fn export(args: ExportArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ws = open(config_path, strict).await?;
    let Some(run) = ws.store.get_run_by_id(args.run_id).await? else {
        eprintln!("run {} not found", args.run_id);
        return Ok(exit_codes::TEST_FAILED);
    };
    let cases = ws.store.get_test_cases_by_run_id(run.id).await?;
    let catalog = build_catalog(&ws.cfg)?;

    let sub = RunSubmission::from_suite_run(&run, &cases, &catalog, &args.user_id);
    let body = serde_json::to_string_pretty(&sub)?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(exit_codes::OK)
}
