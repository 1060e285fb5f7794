//! Assembly layer: load config, apply command-line overrides, build the
//! transport, and dispatch to the run or batch flow.
use std::path::Path;

use genbatch_core::config::{
    self, AppConfig, AppMode, ReplayTransportConfig, TransportConfig,
};
use genbatch_core::error::CliError;

use crate::commands::cli::{Args, Commands, ModeArg};
use crate::flow::{batch, run};

pub fn load_config(args: &Args) -> Result<AppConfig, CliError> {
    let mut cfg = match &args.config {
        Some(path) => {
            let mut cfg = config::load_from_path(Path::new(path))
                .map_err(|e| CliError::Config(e.to_string()))?;
            config::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
            cfg
        }
        None => config::load_default().map_err(|e| CliError::Config(e.to_string()))?,
    };
    apply_args(&mut cfg, args);
    Ok(cfg)
}

/// Command-line flags win over file and environment settings.
pub fn apply_args(cfg: &mut AppConfig, args: &Args) {
    if let Some(mode) = args.mode {
        cfg.app.mode = match mode {
            ModeArg::Completion => AppMode::Completion,
            ModeArg::Workflow => AppMode::Workflow,
        };
    }
    if let Some(script) = &args.replay {
        cfg.transport = TransportConfig::Replay(ReplayTransportConfig {
            script: script.clone(),
            delay_ms: 0,
        });
    }
    if let Some(ms) = args.timeout_ms {
        cfg.generation.timeout_ms = ms;
    }
    if let Commands::Batch(batch) = &args.command {
        if let Some(n) = batch.concurrency {
            cfg.batch.concurrency = n.max(1);
        }
    }
}

pub async fn dispatch(args: &Args, cfg: &AppConfig) -> Result<i32, CliError> {
    let transport = genbatch_plugins::factory::build_transport(&cfg.transport)
        .map_err(|e| CliError::Config(format!("{e:#}")))?;
    tracing::debug!(transport = transport.name(), mode = ?cfg.app.mode, "transport ready");

    match &args.command {
        Commands::Run(run_args) => run::run_single(run_args, cfg, transport).await,
        Commands::Batch(batch_args) => batch::run_batch(batch_args, cfg, transport).await,
    }
}
