use std::collections::HashMap;
use std::time::{Duration, Instant};

use genbatch_core::batch::{BatchEvent, BatchSummary, TaskId, TaskStatus};
use genbatch_core::notify::{Notice, Severity};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{broadcast, oneshot};

/// Progress bars for a batch run, fed by the scheduler's event stream.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: HashMap<TaskId, (ProgressBar, Instant)>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: HashMap::new(),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
        {
            overall.set_style(style.progress_chars("█▓▒░  "));
        }
        overall.set_message("Starting...");

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled: true,
        }
    }

    pub fn add_task(&mut self, task_id: TaskId) {
        if !self.enabled {
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.set_message(format!("⏳ task {}", task_id));
        bar.enable_steady_tick(Duration::from_millis(100));

        self.task_bars.insert(task_id, (bar, Instant::now()));
    }

    pub fn complete_task(&mut self, task_id: TaskId, success: bool) {
        if !self.enabled {
            return;
        }

        if let Some((bar, started)) = self.task_bars.remove(&task_id) {
            let icon = if success { "✅" } else { "❌" };
            let ms = started.elapsed().as_millis();
            bar.finish_with_message(format!("{} task {} ({}ms)", icon, task_id, ms));
        }
        self.overall.inc(1);
    }

    /// A failed task re-entered `Running`.
    pub fn reopen_task(&mut self, task_id: TaskId) {
        if !self.enabled {
            return;
        }
        self.overall.dec(1);
        self.add_task(task_id);
    }

    pub fn apply(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::TaskPromoted { task_id } => self.add_task(*task_id),
            BatchEvent::TaskStatusChanged {
                task_id,
                from: TaskStatus::Failed,
                to: TaskStatus::Running,
            } => self.reopen_task(*task_id),
            BatchEvent::TaskStatusChanged { task_id, to, .. } if to.is_terminal() => {
                self.complete_task(*task_id, *to == TaskStatus::Completed)
            }
            BatchEvent::RetryRequested { .. } => self.set_message("Retrying failed tasks"),
            _ => {}
        }
    }

    /// Print a notice above the bars (or to stderr when hidden).
    pub fn notice(&self, notice: &Notice) {
        let line = format_notice(notice);
        if !self.enabled || self.multi.println(&line).is_err() {
            eprintln!("{line}");
        }
    }

    pub fn set_message(&self, msg: &str) {
        if self.enabled {
            self.overall.set_message(msg.to_string());
        }
    }

    pub fn finish(&self, success: bool) {
        if !self.enabled {
            return;
        }

        let msg = if success {
            "✅ All tasks completed"
        } else {
            "❌ Some tasks failed"
        };
        self.overall.finish_with_message(msg.to_string());
    }

    /// Consume batch events and notices until `done` fires.
    pub async fn follow(
        mut self,
        mut events: broadcast::Receiver<BatchEvent>,
        mut notices: broadcast::Receiver<Notice>,
        mut done: oneshot::Receiver<BatchSummary>,
    ) {
        let mut events_open = true;
        let mut notices_open = true;
        loop {
            tokio::select! {
                biased;

                event = events.recv(), if events_open => match event {
                    Ok(event) => self.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "progress fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
                notice = notices.recv(), if notices_open => match notice {
                    Ok(notice) => self.notice(&notice),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => notices_open = false,
                },
                summary = &mut done => {
                    self.finish(summary.map(|s| s.all_succeeded()).unwrap_or(false));
                    return;
                }
            }
        }
    }
}

pub fn format_notice(notice: &Notice) -> String {
    let label = match notice.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    };
    match notice.task_id {
        Some(id) => format!("[{label}] task {id}: {}", notice.message),
        None => format!("[{label}] {}", notice.message),
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, (bar, _)) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_monitor_disabled() {
        let mut monitor = ProgressMonitor::new(3, false);

        monitor.add_task(1);
        monitor.complete_task(1, true);
        monitor.set_message("test");
        monitor.finish(true);
        assert!(monitor.task_bars.is_empty());
    }

    #[test]
    fn test_events_drive_task_bars() {
        let mut monitor = ProgressMonitor::new(3, true);
        monitor.add_task(1);
        monitor.apply(&BatchEvent::TaskPromoted { task_id: 2 });
        assert_eq!(monitor.task_bars.len(), 2);

        monitor.apply(&BatchEvent::TaskStatusChanged {
            task_id: 1,
            from: TaskStatus::Running,
            to: TaskStatus::Failed,
        });
        assert_eq!(monitor.overall.position(), 1);
        assert!(!monitor.task_bars.contains_key(&1));

        monitor.apply(&BatchEvent::TaskStatusChanged {
            task_id: 1,
            from: TaskStatus::Failed,
            to: TaskStatus::Running,
        });
        assert_eq!(monitor.overall.position(), 0);
        assert!(monitor.task_bars.contains_key(&1));
        monitor.finish(false);
    }

    #[test]
    fn test_format_notice() {
        let notice = Notice {
            severity: Severity::Warning,
            message: "late".into(),
            task_id: Some(3),
        };
        assert_eq!(format_notice(&notice), "[warning] task 3: late");
    }

    #[tokio::test]
    async fn test_follow_stops_on_done() {
        let (events_tx, events_rx) = broadcast::channel(8);
        let (_notices_tx, notices_rx) = broadcast::channel::<Notice>(8);
        let (done_tx, done_rx) = oneshot::channel();

        let monitor = ProgressMonitor::new(1, false);
        let follow = tokio::spawn(monitor.follow(events_rx, notices_rx, done_rx));
        events_tx.send(BatchEvent::TaskPromoted { task_id: 1 }).unwrap();
        done_tx.send(BatchSummary::default()).unwrap();
        follow.await.unwrap();
    }
}
