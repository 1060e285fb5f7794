use std::sync::Arc;

use genbatch_core::config::AppConfig;
use genbatch_core::error::CliError;
use genbatch_core::notify::Notifier;
use genbatch_core::session::{GenerationSession, SessionOptions};
use genbatch_core::transport::Transport;
use serde_json::json;

use crate::commands::cli::RunArgs;
use crate::input::{implied_schema, load_schema, parse_inputs};
use crate::progress::format_notice;

/// Send one request and print its result.
#[tracing::instrument(name = "cli.run", skip_all)]
pub async fn run_single(
    args: &RunArgs,
    cfg: &AppConfig,
    transport: Arc<dyn Transport>,
) -> Result<i32, CliError> {
    let schema = match &args.schema {
        Some(path) => load_schema(path)?,
        None => Vec::new(),
    };
    let inputs = parse_inputs(&args.input, &schema)?;
    let schema = if schema.is_empty() {
        implied_schema(&inputs)
    } else {
        schema
    };

    let notifier = Notifier::default();
    let mut notices = notifier.subscribe();
    let options = SessionOptions::default()
        .workflow(cfg.app.mode.is_workflow())
        .timeout(cfg.generation.timeout());
    let session = GenerationSession::new(transport, notifier, schema.into(), options);

    let result = session.send(&inputs, &[]).await;
    while let Ok(notice) = notices.try_recv() {
        eprintln!("{}", format_notice(&notice));
    }
    let completion = result.map_err(|e| CliError::Command(e.to_string()))?;

    if args.json {
        let snapshot = session.snapshot();
        let record = json!({
            "success": completion.success,
            "phase": snapshot.phase,
            "result": completion.payload,
            "remote_task_id": snapshot.remote_task_id,
            "message_id": snapshot.message_id,
            "trace": snapshot.trace,
        });
        let out = serde_json::to_string_pretty(&record).map_err(anyhow::Error::from)?;
        println!("{out}");
    } else {
        println!("{}", completion.payload.to_export_string());
    }

    if completion.success {
        Ok(0)
    } else {
        Err(CliError::TasksFailed {
            failed: 1,
            total: 1,
        })
    }
}
