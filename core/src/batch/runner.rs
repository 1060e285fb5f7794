use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::scheduler::BatchScheduler;
use super::types::TaskId;
use super::views;
use crate::config::AppConfig;
use crate::error::{BatchError, SessionError};
use crate::notify::Notifier;
use crate::schema::PromptVariable;
use crate::session::{Completion, CompletionPayload, GenerationSession, SessionOptions};
use crate::transport::{Feedback, Transport};

type Finished = (TaskId, Option<Completion>);

/// Totals reported once a drive pass settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }
}

/// Runs a batch end to end: one [`GenerationSession`] per task, completions
/// routed back through the scheduler, promoted tasks launched as they are
/// admitted.
#[derive(Clone)]
pub struct BatchRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    scheduler: BatchScheduler,
    transport: Arc<dyn Transport>,
    notifier: Notifier,
    workflow: bool,
    timeout: Duration,
    sessions: Mutex<HashMap<TaskId, GenerationSession>>,
    /// Keeps its seen-version across drive passes so a retry requested
    /// between passes is not lost.
    retry_rx: Mutex<watch::Receiver<u64>>,
}

impl BatchRunner {
    pub fn new(
        scheduler: BatchScheduler,
        transport: Arc<dyn Transport>,
        notifier: Notifier,
        config: &AppConfig,
    ) -> Self {
        let retry_rx = scheduler.retry_signal();
        Self {
            inner: Arc::new(RunnerInner {
                scheduler,
                transport,
                notifier,
                workflow: config.app.mode.is_workflow(),
                timeout: config.generation.timeout(),
                sessions: Mutex::new(HashMap::new()),
                retry_rx: Mutex::new(retry_rx),
            }),
        }
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.inner.scheduler
    }

    /// Validate the grid and admit the first window. Rejections are
    /// published as notices.
    pub fn start(&self, grid: &[Vec<String>], schema: &[PromptVariable]) -> bool {
        if !self.inner.scheduler.start_batch_run(grid, schema) {
            return false;
        }
        lock(&self.inner.sessions).clear();
        true
    }

    /// Like [`start`](Self::start), but hands the rejection back instead of
    /// publishing it. Returns the ids admitted in the first window.
    pub fn try_start(
        &self,
        grid: &[Vec<String>],
        schema: &[PromptVariable],
    ) -> Result<Vec<TaskId>, BatchError> {
        let running = self.inner.scheduler.try_start_batch_run(grid, schema)?;
        lock(&self.inner.sessions).clear();
        Ok(running)
    }

    /// Launch every running task and keep the pool moving until nothing is
    /// in flight. Retry signals seen meanwhile queue the failed tasks for a
    /// re-send within the window.
    pub async fn drive(&self) -> BatchSummary {
        let scheduler = &self.inner.scheduler;
        let (tx, mut rx) = mpsc::unbounded_channel::<Finished>();
        let mut retry_rx = lock(&self.inner.retry_rx).clone();
        let mut in_flight = 0usize;

        for task in views::running(&scheduler.tasks()) {
            self.launch(task.id, &tx);
            in_flight += 1;
        }
        if retry_rx.has_changed().unwrap_or(false) {
            retry_rx.borrow_and_update();
            in_flight += self.retry_failed(&tx);
        }

        while in_flight > 0 {
            tokio::select! {
                Some((task_id, completion)) = rx.recv() => {
                    in_flight -= 1;
                    let (payload, success) = match completion {
                        Some(completion) => (completion.payload, completion.success),
                        None => (CompletionPayload::default(), false),
                    };
                    for promoted in scheduler.handle_completed(payload, task_id, success) {
                        self.launch(promoted, &tx);
                        in_flight += 1;
                    }
                }
                Ok(()) = retry_rx.changed() => {
                    retry_rx.borrow_and_update();
                    in_flight += self.retry_failed(&tx);
                }
                else => break,
            }
        }

        *lock(&self.inner.retry_rx) = retry_rx;
        self.summary()
    }

    pub fn summary(&self) -> BatchSummary {
        let tasks = self.inner.scheduler.tasks();
        BatchSummary {
            total: tasks.len(),
            succeeded: views::succeeded(&tasks).len(),
            failed: views::failed(&tasks).len(),
        }
    }

    pub fn session(&self, task_id: TaskId) -> Option<GenerationSession> {
        lock(&self.inner.sessions).get(&task_id).cloned()
    }

    /// Stop one task; siblings keep running.
    pub async fn stop(&self, task_id: TaskId) -> Result<(), BatchError> {
        let session = self
            .session(task_id)
            .ok_or(BatchError::UnknownTask(task_id))?;
        session.stop().await;
        Ok(())
    }

    pub async fn feedback(&self, task_id: TaskId, feedback: Feedback) -> Result<(), SessionError> {
        match self.session(task_id) {
            Some(session) => session.handle_feedback(feedback).await,
            None => Err(SessionError::NoMessage),
        }
    }

    /// Abort every session and leave batch mode.
    pub fn clear(&self) {
        let sessions: Vec<GenerationSession> =
            lock(&self.inner.sessions).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.abort();
        }
        self.inner.scheduler.clear_batch_state();
    }

    fn session_for(&self, task_id: TaskId) -> GenerationSession {
        lock(&self.inner.sessions)
            .entry(task_id)
            .or_insert_with(|| {
                let options = SessionOptions::default()
                    .workflow(self.inner.workflow)
                    .timeout(self.inner.timeout)
                    .batch_task(task_id);
                GenerationSession::new(
                    self.inner.transport.clone(),
                    self.inner.notifier.clone(),
                    self.inner.scheduler.schema(),
                    options,
                )
            })
            .clone()
    }

    fn launch(&self, task_id: TaskId, tx: &mpsc::UnboundedSender<Finished>) {
        let session = self.session_for(task_id);
        let inputs = self
            .inner
            .scheduler
            .task(task_id)
            .map(|t| t.params.inputs)
            .unwrap_or_default();
        let tx = tx.clone();
        let notifier = self.inner.notifier.clone();

        tracing::debug!(target: "genbatch.batch", task_id, "launching session");
        tokio::spawn(async move {
            // Inner spawn so a panicking send still reports back.
            let send = tokio::spawn(async move { session.send(&inputs, &[]).await });
            let completion = match send.await {
                Ok(Ok(completion)) => Some(completion),
                // The session already published the rejection.
                Ok(Err(_)) => None,
                Err(join) => {
                    notifier.error(join.to_string(), Some(task_id));
                    None
                }
            };
            let _ = tx.send((task_id, completion));
        });
    }

    /// Launch the failed tasks the scheduler admits now; the rest wait in
    /// its retry queue and come back through `handle_completed`.
    fn retry_failed(&self, tx: &mpsc::UnboundedSender<Finished>) -> usize {
        let retried = self.inner.scheduler.begin_retry_all();
        for &task_id in &retried {
            self.launch(task_id, tx);
        }
        retried.len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
