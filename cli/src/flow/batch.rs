use std::sync::Arc;

use genbatch_core::batch::{BatchRunner, BatchScheduler};
use genbatch_core::config::AppConfig;
use genbatch_core::error::CliError;
use genbatch_core::notify::Notifier;
use genbatch_core::transport::Transport;
use tokio::sync::oneshot;

use crate::commands::cli::BatchArgs;
use crate::input::{load_grid, load_schema};
use crate::progress::ProgressMonitor;

/// Run every row of the grid through the bounded pool and export the rows.
#[tracing::instrument(name = "cli.batch", skip_all)]
pub async fn run_batch(
    args: &BatchArgs,
    cfg: &AppConfig,
    transport: Arc<dyn Transport>,
) -> Result<i32, CliError> {
    let schema = load_schema(&args.schema)?;
    let grid = load_grid(&args.grid)?;

    let notifier = Notifier::new(cfg.batch.event_capacity);
    let scheduler = BatchScheduler::new(&cfg.batch, notifier.clone());
    let runner = BatchRunner::new(scheduler.clone(), transport, notifier.clone(), cfg);

    let events = scheduler.subscribe();
    let notices = notifier.subscribe();
    let running = runner.try_start(&grid, &schema)?;
    let total = scheduler.tasks().len();

    let show = !args.no_progress && atty::is(atty::Stream::Stderr);
    let mut monitor = ProgressMonitor::new(total, show);
    for task_id in running {
        monitor.add_task(task_id);
    }
    let (done_tx, done_rx) = oneshot::channel();
    let follow = tokio::spawn(monitor.follow(events, notices, done_rx));

    let mut summary = runner.drive().await;
    if args.retry_failed && summary.failed > 0 {
        tracing::info!(failed = summary.failed, "retrying failed tasks");
        scheduler.handle_retry_all_failed_task();
        summary = runner.drive().await;
    }
    let _ = done_tx.send(summary);
    if let Err(err) = follow.await {
        tracing::warn!(error = %err, "progress display ended abnormally");
    }

    let rows = scheduler.export_rows();
    let out = serde_json::to_string_pretty(&rows).map_err(anyhow::Error::from)?;
    match &args.out {
        Some(path) => std::fs::write(path, out)?,
        None => println!("{out}"),
    }

    tracing::info!(
        run_id = ?scheduler.run_id(),
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "batch finished"
    );
    if summary.failed > 0 {
        return Err(CliError::TasksFailed {
            failed: summary.failed,
            total: summary.total,
        });
    }
    Ok(0)
}
