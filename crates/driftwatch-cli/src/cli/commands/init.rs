use super::exit_codes;
use crate::cli::args::InitArgs;
use driftwatch_core::config::{load_config, write_sample_config};
use driftwatch_core::storage::open_repository;
use std::path::Path;

pub async fn run(args: InitArgs, config_path: &Path) -> anyhow::Result<i32> {
    if config_path.exists() && !args.force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    } else {
        write_sample_config(config_path)?;
        eprintln!("Wrote {}", config_path.display());
    }

    let cfg = load_config(config_path, false)?;
    let store = open_repository(&cfg.storage).await?;
    eprintln!(
        "Storage ready ({}). Set {} and run `driftwatch run`.",
        store.backend_name(),
        cfg.endpoint.api_key_env
    );
    Ok(exit_codes::OK)
}
