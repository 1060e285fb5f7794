use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use super::events::BatchEvent;
use super::types::{Task, TaskId, TaskStatus};
use super::validate::validate_grid;
use super::views::{self, ExportRow};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::notify::Notifier;
use crate::schema::PromptVariable;
use crate::session::CompletionPayload;

/// Concurrency-limited task pool of one batch run.
///
/// All status transitions go through one mutex: the next task list is
/// computed from the latest one and installed as a single replacement, so
/// completions racing from several sessions never lose each other's update.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    window: usize,
    result_column: String,
    notifier: Notifier,
    state: Mutex<BatchState>,
    /// Written by many sessions, read only for export.
    results: Mutex<HashMap<TaskId, CompletionPayload>>,
    retry: watch::Sender<u64>,
    events: broadcast::Sender<BatchEvent>,
}

struct BatchState {
    is_batch_active: bool,
    run_id: Option<String>,
    tasks: Arc<Vec<Task>>,
    schema: Arc<[PromptVariable]>,
    /// Terminal count at the last admitted group; only moves forward.
    group_marker: usize,
    /// Failed tasks waiting for a free slot, in request order.
    retry_queue: VecDeque<TaskId>,
}

impl Default for BatchState {
    fn default() -> Self {
        Self {
            is_batch_active: false,
            run_id: None,
            tasks: Arc::new(Vec::new()),
            schema: Arc::from(Vec::new()),
            group_marker: 0,
            retry_queue: VecDeque::new(),
        }
    }
}

impl BatchScheduler {
    pub fn new(config: &BatchConfig, notifier: Notifier) -> Self {
        let (retry, _) = watch::channel(0);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(SchedulerInner {
                window: config.window(),
                result_column: config.result_column.clone(),
                notifier,
                state: Mutex::new(BatchState::default()),
                results: Mutex::new(HashMap::new()),
                retry,
                events,
            }),
        }
    }

    pub fn window(&self) -> usize {
        self.inner.window
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    pub fn retry_signal(&self) -> watch::Receiver<u64> {
        self.inner.retry.subscribe()
    }

    pub fn is_batch_active(&self) -> bool {
        lock(&self.inner.state).is_batch_active
    }

    pub fn run_id(&self) -> Option<String> {
        lock(&self.inner.state).run_id.clone()
    }

    /// Current task list. The returned snapshot never changes underneath.
    pub fn tasks(&self) -> Arc<Vec<Task>> {
        lock(&self.inner.state).tasks.clone()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks().iter().find(|t| t.id == id).cloned()
    }

    pub fn schema(&self) -> Arc<[PromptVariable]> {
        lock(&self.inner.state).schema.clone()
    }

    pub fn all_tasks_run(&self) -> bool {
        views::all_tasks_run(&self.tasks())
    }

    /// Validate the grid and start a run. Failures are reported as notices.
    pub fn start_batch_run(&self, grid: &[Vec<String>], schema: &[PromptVariable]) -> bool {
        match self.try_start_batch_run(grid, schema) {
            Ok(_) => true,
            Err(err) => {
                self.inner.notifier.notify(err.severity(), err.to_string(), None);
                false
            }
        }
    }

    /// Like [`start_batch_run`](Self::start_batch_run) but returns the ids
    /// admitted into the first window.
    pub fn try_start_batch_run(
        &self,
        grid: &[Vec<String>],
        schema: &[PromptVariable],
    ) -> Result<Vec<TaskId>, BatchError> {
        let rows = validate_grid(grid, schema)?;

        let mut state = lock(&self.inner.state);
        if !views::all_tasks_run(&state.tasks) {
            return Err(BatchError::PreviousBatchRunning);
        }

        let window = self.inner.window;
        let tasks: Vec<Task> = rows
            .into_iter()
            .enumerate()
            .map(|(idx, inputs)| {
                let status = if idx < window {
                    TaskStatus::Running
                } else {
                    TaskStatus::Pending
                };
                Task::new(idx as TaskId + 1, status, inputs)
            })
            .collect();
        let running: Vec<TaskId> = views::running(&tasks).iter().map(|t| t.id).collect();
        let total = tasks.len();
        let run_id = uuid::Uuid::new_v4().to_string();

        lock(&self.inner.results).clear();
        *state = BatchState {
            is_batch_active: true,
            run_id: Some(run_id.clone()),
            tasks: Arc::new(tasks),
            schema: schema.into(),
            group_marker: 0,
            retry_queue: VecDeque::new(),
        };
        drop(state);

        tracing::info!(
            target: "genbatch.batch",
            run_id = %run_id,
            total,
            running = running.len(),
            window,
            "batch started"
        );
        self.emit(BatchEvent::BatchStarted {
            run_id,
            total,
            running: running.len(),
        });
        Ok(running)
    }

    /// Record a task's single completion and promote the next group when a
    /// window boundary is crossed. Returns the promoted task ids followed by
    /// any queued retries that took a freed slot.
    pub fn handle_completed(
        &self,
        payload: CompletionPayload,
        task_id: TaskId,
        success: bool,
    ) -> Vec<TaskId> {
        let window = self.inner.window;
        let mut state = lock(&self.inner.state);
        let tasks = state.tasks.clone();

        match tasks.iter().find(|t| t.id == task_id).map(|t| t.status) {
            Some(TaskStatus::Running) => {}
            Some(status) => {
                tracing::warn!(target: "genbatch.batch", task_id, status = ?status, "completion for a task that is not running");
                return Vec::new();
            }
            None => {
                tracing::warn!(target: "genbatch.batch", task_id, "completion for an unknown task");
                return Vec::new();
            }
        }

        let total = tasks.len();
        let done = tasks.iter().filter(|t| t.status.is_terminal()).count() + 1;
        let pending: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id)
            .collect();

        // Retries lower the terminal count; never admit a boundary twice.
        let admit = done > state.group_marker
            && !pending.is_empty()
            && (done % window == 0 || total - done < window);
        let promoted: Vec<TaskId> = if admit {
            state.group_marker = done;
            pending.into_iter().take(window).collect()
        } else {
            Vec::new()
        };

        let to = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let mut next: Vec<Task> = tasks
            .iter()
            .map(|t| {
                let mut t = t.clone();
                if t.id == task_id {
                    t.status = to;
                } else if promoted.contains(&t.id) {
                    t.status = TaskStatus::Running;
                }
                t
            })
            .collect();
        let retried = admit_retries(&mut next, &mut state.retry_queue, window);

        lock(&self.inner.results).insert(task_id, payload);
        state.tasks = Arc::new(next);
        drop(state);

        tracing::info!(
            target: "genbatch.batch",
            task_id,
            success,
            done,
            total,
            promoted = promoted.len(),
            "task finished"
        );
        self.emit(BatchEvent::TaskStatusChanged {
            task_id,
            from: TaskStatus::Running,
            to,
        });
        for id in &promoted {
            self.emit(BatchEvent::TaskPromoted { task_id: *id });
        }
        self.emit_retried(&retried);
        promoted.into_iter().chain(retried).collect()
    }

    /// Bump the retry signal. Task statuses are left alone.
    pub fn handle_retry_all_failed_task(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let mut signal = 0;
        self.inner.retry.send_modify(|value| {
            *value = now.max(*value + 1);
            signal = *value;
        });
        tracing::info!(target: "genbatch.batch", signal, "retry requested");
        self.emit(BatchEvent::RetryRequested { signal });
        signal
    }

    /// Queue a failed task for a re-send.
    ///
    /// Queued tasks stay `Failed` until they are admitted: only once no task
    /// is `Pending`, and only into free slots of the window. Returns every
    /// task that re-entered `Running` now, which may include tasks queued
    /// earlier. Tasks that are not failed or already queued are ignored.
    pub fn begin_retry(&self, task_id: TaskId) -> Result<Vec<TaskId>, BatchError> {
        let mut state = lock(&self.inner.state);
        let status = state
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
            .ok_or(BatchError::UnknownTask(task_id))?;
        if status == TaskStatus::Failed && !state.retry_queue.contains(&task_id) {
            state.retry_queue.push_back(task_id);
        }
        let retried = self.admit_queued(&mut state);
        drop(state);
        self.emit_retried(&retried);
        Ok(retried)
    }

    /// Queue every failed task, in id order. Returns the tasks started now.
    pub fn begin_retry_all(&self) -> Vec<TaskId> {
        let mut state = lock(&self.inner.state);
        let failed: Vec<TaskId> = views::failed(&state.tasks).iter().map(|t| t.id).collect();
        for task_id in failed {
            if !state.retry_queue.contains(&task_id) {
                state.retry_queue.push_back(task_id);
            }
        }
        let retried = self.admit_queued(&mut state);
        let queued = state.retry_queue.len();
        drop(state);

        tracing::info!(target: "genbatch.batch", started = retried.len(), queued, "retrying failed tasks");
        self.emit_retried(&retried);
        retried
    }

    /// Failed tasks still waiting for a slot.
    pub fn queued_retries(&self) -> Vec<TaskId> {
        lock(&self.inner.state).retry_queue.iter().copied().collect()
    }

    fn admit_queued(&self, state: &mut BatchState) -> Vec<TaskId> {
        if state.retry_queue.is_empty() {
            return Vec::new();
        }
        let mut next: Vec<Task> = state.tasks.as_ref().clone();
        let retried = admit_retries(&mut next, &mut state.retry_queue, self.inner.window);
        if !retried.is_empty() {
            state.tasks = Arc::new(next);
        }
        retried
    }

    fn emit_retried(&self, retried: &[TaskId]) {
        for &task_id in retried {
            tracing::debug!(target: "genbatch.batch", task_id, "retrying task");
            self.emit(BatchEvent::TaskStatusChanged {
                task_id,
                from: TaskStatus::Failed,
                to: TaskStatus::Running,
            });
        }
    }

    /// Leave batch mode: drop the task list and recorded results.
    pub fn clear_batch_state(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.is_batch_active = false;
            state.run_id = None;
            state.tasks = Arc::new(Vec::new());
            state.group_marker = 0;
            state.retry_queue.clear();
        }
        lock(&self.inner.results).clear();
        tracing::info!(target: "genbatch.batch", "batch state cleared");
        self.emit(BatchEvent::BatchCleared);
    }

    pub fn result(&self, task_id: TaskId) -> Option<CompletionPayload> {
        lock(&self.inner.results).get(&task_id).cloned()
    }

    pub fn export_rows(&self) -> Vec<ExportRow> {
        let (tasks, schema) = {
            let state = lock(&self.inner.state);
            (state.tasks.clone(), state.schema.clone())
        };
        let results = lock(&self.inner.results);
        views::export_rows(&tasks, &schema, &results, &self.inner.result_column)
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Move queued retries into free slots. Nothing is admitted while any task
/// is still `Pending`, so the group marker never sees a retried task.
fn admit_retries(tasks: &mut [Task], queue: &mut VecDeque<TaskId>, window: usize) -> Vec<TaskId> {
    if tasks.iter().any(|t| t.status == TaskStatus::Pending) {
        return Vec::new();
    }
    let mut free = window.saturating_sub(views::running(tasks).len());
    let mut retried = Vec::new();
    while free > 0 {
        let Some(task_id) = queue.pop_front() else { break };
        if let Some(task) = tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == TaskStatus::Failed)
        {
            task.status = TaskStatus::Running;
            retried.push(task_id);
            free -= 1;
        }
    }
    retried
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::VarType;
    use pretty_assertions::assert_eq;

    fn scheduler(window: usize) -> BatchScheduler {
        let config = BatchConfig {
            concurrency: window,
            ..BatchConfig::default()
        };
        BatchScheduler::new(&config, Notifier::default())
    }

    fn schema() -> Vec<PromptVariable> {
        vec![PromptVariable::new("q", "Q", VarType::String)]
    }

    fn grid(rows: usize) -> Vec<Vec<String>> {
        let mut grid = vec![vec!["Q".to_string()]];
        grid.extend((0..rows).map(|i| vec![format!("row {i}")]));
        grid
    }

    fn count(s: &BatchScheduler, status: TaskStatus) -> usize {
        s.tasks().iter().filter(|t| t.status == status).count()
    }

    #[test]
    fn test_initial_window() {
        let s = scheduler(5);
        assert!(s.start_batch_run(&grid(12), &schema()));
        assert!(s.is_batch_active());
        assert_eq!(count(&s, TaskStatus::Running), 5);
        assert_eq!(count(&s, TaskStatus::Pending), 7);
        let ids: Vec<TaskId> = s.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_invalid_grid_leaves_state_untouched() {
        let s = scheduler(5);
        let mut rx = s.inner.notifier.subscribe();
        assert!(!s.start_batch_run(&[], &schema()));
        assert!(!s.is_batch_active());
        assert!(s.tasks().is_empty());
        assert_eq!(rx.try_recv().unwrap().severity, crate::notify::Severity::Error);
    }

    #[test]
    fn test_previous_batch_must_finish() {
        let s = scheduler(2);
        assert!(s.start_batch_run(&grid(3), &schema()));
        assert_eq!(
            s.try_start_batch_run(&grid(1), &schema()),
            Err(BatchError::PreviousBatchRunning)
        );
        assert_eq!(s.tasks().len(), 3);
    }

    #[test]
    fn test_promotes_at_window_boundary() {
        let s = scheduler(2);
        s.start_batch_run(&grid(5), &schema());

        assert_eq!(s.handle_completed("a".into(), 1, true), Vec::<TaskId>::new());
        assert_eq!(s.handle_completed("b".into(), 2, true), vec![3, 4]);
        assert_eq!(count(&s, TaskStatus::Running), 2);

        assert_eq!(s.handle_completed("c".into(), 3, false), Vec::<TaskId>::new());
        assert_eq!(s.handle_completed("d".into(), 4, true), vec![5]);
        assert_eq!(s.handle_completed("e".into(), 5, true), Vec::<TaskId>::new());
        assert!(s.all_tasks_run());
    }

    #[test]
    fn test_ignores_non_running_and_unknown() {
        let s = scheduler(1);
        s.start_batch_run(&grid(2), &schema());
        assert!(s.handle_completed("x".into(), 2, true).is_empty());
        assert!(s.handle_completed("x".into(), 9, true).is_empty());
        assert_eq!(s.task(2).unwrap().status, TaskStatus::Pending);
        assert!(s.result(2).is_none());
    }

    #[test]
    fn test_retry_signal_only() {
        let s = scheduler(1);
        s.start_batch_run(&grid(1), &schema());
        s.handle_completed("".into(), 1, false);

        let rx = s.retry_signal();
        let first = s.handle_retry_all_failed_task();
        let second = s.handle_retry_all_failed_task();
        assert!(second > first);
        assert_eq!(*rx.borrow(), second);
        assert_eq!(s.task(1).unwrap().status, TaskStatus::Failed);

        assert_eq!(s.begin_retry(1), Ok(vec![1]));
        assert_eq!(s.task(1).unwrap().status, TaskStatus::Running);
        assert_eq!(s.begin_retry(1), Ok(vec![]));
        assert_eq!(s.begin_retry(7), Err(BatchError::UnknownTask(7)));
    }

    #[test]
    fn test_retry_overwrites_result() {
        let s = scheduler(1);
        s.start_batch_run(&grid(1), &schema());
        s.handle_completed("first".into(), 1, false);
        s.begin_retry(1).unwrap();
        s.handle_completed("second".into(), 1, true);
        assert_eq!(s.result(1), Some(CompletionPayload::from("second")));
        assert_eq!(s.export_rows()[0].get("Result"), Some("second"));
    }

    #[test]
    fn test_retries_wait_for_pending_tasks() {
        let s = scheduler(2);
        s.start_batch_run(&grid(6), &schema());
        s.handle_completed("".into(), 1, false);
        assert_eq!(s.handle_completed("".into(), 2, false), vec![3, 4]);

        assert!(s.begin_retry_all().is_empty());
        assert_eq!(s.queued_retries(), vec![1, 2]);
        assert_eq!(s.begin_retry(1), Ok(vec![]));
        assert_eq!(s.queued_retries(), vec![1, 2]);

        s.handle_completed("".into(), 3, true);
        assert_eq!(s.handle_completed("".into(), 4, true), vec![5, 6]);
        assert_eq!(count(&s, TaskStatus::Failed), 2);

        // Pending is empty now; each freed slot takes one queued retry.
        assert_eq!(s.handle_completed("".into(), 5, true), vec![1]);
        assert_eq!(s.handle_completed("".into(), 6, true), vec![2]);
        assert!(s.queued_retries().is_empty());
        assert_eq!(count(&s, TaskStatus::Running), 2);

        s.handle_completed("ok".into(), 1, true);
        s.handle_completed("ok".into(), 2, true);
        assert!(s.all_tasks_run());
        assert_eq!(count(&s, TaskStatus::Completed), 6);
    }

    #[test]
    fn test_clear_drops_queued_retries() {
        let s = scheduler(1);
        s.start_batch_run(&grid(2), &schema());
        s.handle_completed("".into(), 1, false);
        s.begin_retry_all();
        assert_eq!(s.queued_retries(), vec![1]);
        s.clear_batch_state();
        assert!(s.queued_retries().is_empty());
    }

    #[test]
    fn test_clear_batch_state() {
        let s = scheduler(3);
        let mut events = s.subscribe();
        s.start_batch_run(&grid(2), &schema());
        s.clear_batch_state();
        assert!(!s.is_batch_active());
        assert!(s.tasks().is_empty());
        assert!(s.export_rows().is_empty());

        assert!(matches!(events.try_recv().unwrap(), BatchEvent::BatchStarted { total: 2, running: 2, .. }));
        assert_eq!(events.try_recv().unwrap(), BatchEvent::BatchCleared);
    }
}
