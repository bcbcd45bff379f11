use super::args::{Cli, Command};
use anyhow::Context;
use driftwatch_core::catalog::PromptCatalog;
use driftwatch_core::config::{load_config, MonitorConfig};
use driftwatch_core::errors::ConfigError;
use driftwatch_core::providers::llm::anthropic::AnthropicClient;
use driftwatch_core::providers::llm::fake::FakeClient;
use driftwatch_core::providers::llm::EndpointClient;
use driftwatch_core::storage::{open_repository, RunRepository};
use std::path::Path;
use std::sync::Arc;

pub mod config;
pub mod init;
pub mod run;
pub mod status;
pub mod submit;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const RUN_IN_PROGRESS: i32 = 3;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let Cli {
        config: config_path,
        strict,
        cmd,
    } = cli;
    match cmd {
        Command::Init(args) => init::run(args, &config_path).await,
        Command::Run(args) => run::run(args, &config_path, strict).await,
        Command::Daemon(args) => run::daemon(args, &config_path, strict).await,
        Command::Status(args) => status::status(args, &config_path, strict).await,
        Command::History(args) => status::history(args, &config_path, strict).await,
        Command::Show(args) => status::show(args, &config_path, strict).await,
        Command::Config(args) => config::run(args, &config_path, strict).await,
        Command::Submit(args) => submit::submit(args, &config_path, strict).await,
        Command::ExportSubmission(args) => submit::export(args, &config_path, strict).await,
    }
}

/// Config plus an open store; what every command except `init` starts from.
pub(crate) struct Workspace {
    pub cfg: MonitorConfig,
    pub store: Arc<dyn RunRepository>,
}

pub(crate) async fn open(config_path: &Path, strict: bool) -> anyhow::Result<Workspace> {
    let cfg = load_config(config_path, strict)?;
    let store = open_repository(&cfg.storage)
        .await
        .context("failed to open storage")?;
    tracing::debug!(backend = store.backend_name(), "storage opened");
    Ok(Workspace { cfg, store })
}

pub(crate) fn build_catalog(cfg: &MonitorConfig) -> anyhow::Result<PromptCatalog> {
    match &cfg.catalog_file {
        Some(path) => Ok(driftwatch_scorers::load_catalog(path)?),
        None => driftwatch_scorers::default_catalog(),
    }
}

/// Dry runs answer every prompt with "OK" and never touch the network.
pub(crate) fn build_client(
    cfg: &MonitorConfig,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn EndpointClient>> {
    if dry_run {
        return Ok(Arc::new(FakeClient::constant("OK")));
    }
    match cfg.endpoint.provider.as_str() {
        "anthropic" => {
            let key = cfg.endpoint.resolve_api_key()?;
            Ok(Arc::new(AnthropicClient::new(&cfg.endpoint, key)?))
        }
        other => Err(ConfigError(format!("config error: unsupported provider '{}'", other)).into()),
    }
}
