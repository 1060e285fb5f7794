use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::payload::build_payload;
use super::types::{
    Completion, CompletionPayload, SessionOptions, SessionPhase, SessionSnapshot,
};
use crate::batch::TaskId;
use crate::error::SessionError;
use crate::notify::Notifier;
use crate::schema::{first_missing_required, Inputs, PromptVariable};
use crate::trace::{self, ExecutionTrace, TraceOutcome, WorkflowEvent};
use crate::transport::{AttachedFile, CompletionEvent, Feedback, RequestPayload, Transport};

pub const TIMEOUT_WARNING: &str = "generation timeout exceeded; the late result was discarded";

/// Drives one task's request/stream lifecycle against a [`Transport`].
///
/// Cloning is cheap and every clone controls the same session, so a stop
/// issued from one handle interrupts a send awaited on another.
#[derive(Clone)]
pub struct GenerationSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    notifier: Notifier,
    schema: Arc<[PromptVariable]>,
    options: SessionOptions,
    state: watch::Sender<SessionSnapshot>,
    /// Bumped on every accepted send; stale streams stop publishing.
    generation: AtomicU64,
    abort: Mutex<Option<CancellationToken>>,
}

/// How a stream ended.
enum Finish {
    Success,
    Failure { error: Option<String> },
    Stopped,
    TimedOut,
    Aborted,
}

trait StreamEvent: Send + 'static {
    fn is_terminal(&self) -> bool;
}

impl StreamEvent for CompletionEvent {
    fn is_terminal(&self) -> bool {
        CompletionEvent::is_terminal(self)
    }
}

impl StreamEvent for WorkflowEvent {
    fn is_terminal(&self) -> bool {
        WorkflowEvent::is_terminal(self)
    }
}

impl GenerationSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Notifier,
        schema: Arc<[PromptVariable]>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                transport,
                notifier,
                schema,
                options,
                state,
                generation: AtomicU64::new(0),
                abort: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_responding(&self) -> bool {
        self.inner.state.borrow().is_responding
    }

    /// Send one request and wait for its single completion report.
    ///
    /// Precondition failures are published as notices and returned as `Err`;
    /// nothing is sent in that case.
    pub async fn send(
        &self,
        inputs: &Inputs,
        files: &[AttachedFile],
    ) -> Result<Completion, SessionError> {
        if self.is_responding() {
            return Err(self.reject(SessionError::AlreadyResponding));
        }
        if !self.inner.options.batch_mode {
            if let Some(var) = first_missing_required(&self.inner.schema, inputs) {
                return Err(self.reject(SessionError::MissingRequired {
                    name: var.name.clone(),
                }));
            }
            if files.iter().any(AttachedFile::is_uploading) {
                return Err(self.reject(SessionError::FilesUploading));
            }
        }

        let payload = build_payload(&self.inner.schema, inputs, files);
        let cancel = CancellationToken::new();
        let Some(gen) = self.begin(cancel.clone()) else {
            return Err(self.reject(SessionError::AlreadyResponding));
        };

        tracing::info!(
            target: "genbatch.session",
            stage = "send.start",
            task_id = ?self.inner.options.task_id,
            workflow = self.inner.options.workflow,
            transport = self.inner.transport.name(),
            inputs = payload.inputs.len(),
        );

        let completion = if self.inner.options.workflow {
            self.run_workflow(gen, payload, cancel).await
        } else {
            self.run_completion(gen, payload, cancel).await
        };
        Ok(completion)
    }

    /// Ask the backend to stop, then abort locally whatever the answer.
    pub async fn stop(&self) {
        let mut remote = None;
        self.inner.state.send_if_modified(|s| match (&s.remote_task_id, s.is_stopping) {
            (Some(id), false) => {
                remote = Some(id.clone());
                s.is_stopping = true;
                true
            }
            _ => false,
        });
        let Some(remote) = remote else {
            tracing::debug!(target: "genbatch.session", stage = "stop.skip", task_id = ?self.inner.options.task_id);
            return;
        };

        tracing::info!(target: "genbatch.session", stage = "stop", remote_task_id = %remote);
        let res = if self.inner.options.workflow {
            self.inner.transport.stop_workflow(&remote).await
        } else {
            self.inner.transport.stop_completion(&remote).await
        };
        if let Err(err) = res {
            self.inner
                .notifier
                .error(format!("{err:#}"), self.inner.options.task_id);
        }

        self.cancel_in_flight();
        self.inner.state.send_modify(|s| s.is_stopping = false);
    }

    /// Local-only stop: cancel the in-flight request without telling the backend.
    pub fn abort(&self) {
        self.cancel_in_flight();
        self.inner.state.send_modify(|s| {
            if s.is_responding {
                s.is_responding = false;
                s.phase = SessionPhase::Aborted;
            }
        });
    }

    /// Record a rating against the last finished message.
    pub async fn handle_feedback(&self, feedback: Feedback) -> Result<(), SessionError> {
        let Some(message_id) = self.snapshot().message_id else {
            tracing::warn!(target: "genbatch.session", task_id = ?self.inner.options.task_id, "feedback without a message");
            return Err(SessionError::NoMessage);
        };

        match self
            .inner
            .transport
            .update_feedback(&message_id, &feedback)
            .await
        {
            Ok(()) => {
                self.inner.state.send_modify(|s| s.feedback = Some(feedback));
                Ok(())
            }
            Err(err) => Err(self.reject(SessionError::Transport(format!("{err:#}")))),
        }
    }

    fn reject(&self, err: SessionError) -> SessionError {
        self.inner
            .notifier
            .notify(err.severity(), err.to_string(), self.inner.options.task_id);
        err
    }

    /// Reset per-send state and claim the session. `None` if already claimed.
    fn begin(&self, cancel: CancellationToken) -> Option<u64> {
        let mut gen = None;
        let inner = &self.inner;
        inner.state.send_if_modified(|s| {
            if s.is_responding {
                return false;
            }
            gen = Some(inner.generation.fetch_add(1, Ordering::SeqCst) + 1);
            // Installed before the new state is visible to stop()/abort().
            *lock(&inner.abort) = Some(cancel);
            *s = SessionSnapshot {
                phase: SessionPhase::Sending,
                is_responding: true,
                ..SessionSnapshot::default()
            };
            true
        });
        gen
    }

    fn update(&self, gen: u64, f: impl FnOnce(&mut SessionSnapshot)) {
        if self.inner.generation.load(Ordering::SeqCst) != gen {
            return;
        }
        self.inner.state.send_modify(f);
    }

    fn cancel_in_flight(&self) {
        if let Some(token) = lock(&self.inner.abort).take() {
            token.cancel();
        }
    }

    async fn run_completion(
        &self,
        gen: u64,
        payload: RequestPayload,
        cancel: CancellationToken,
    ) -> Completion {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self.inner.transport.clone();
        let call_cancel = cancel.clone();
        let call =
            tokio::spawn(async move { transport.send_completion(payload, tx, call_cancel).await });

        let mut text = String::new();
        let mut message_id: Option<String> = None;
        let finish = self
            .drive(rx, call, cancel, |event| match event {
                CompletionEvent::Data {
                    chunk,
                    message_id: id,
                    task_id,
                    ..
                } => {
                    text.push_str(&chunk);
                    if id.is_some() {
                        message_id = id;
                    }
                    let text = text.clone();
                    self.update(gen, move |s| {
                        s.phase = SessionPhase::Streaming;
                        s.text = text;
                        latch(&mut s.remote_task_id, task_id);
                    });
                    None
                }
                CompletionEvent::MessageReplace { answer } => {
                    text = answer;
                    let text = text.clone();
                    self.update(gen, move |s| s.text = text);
                    None
                }
                CompletionEvent::Completed => Some(Finish::Success),
                CompletionEvent::Error { message } => Some(Finish::Failure {
                    error: Some(message),
                }),
            })
            .await;

        self.conclude(gen, finish, CompletionPayload::Text(text), message_id)
    }

    async fn run_workflow(
        &self,
        gen: u64,
        payload: RequestPayload,
        cancel: CancellationToken,
    ) -> Completion {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self.inner.transport.clone();
        let call_cancel = cancel.clone();
        let call =
            tokio::spawn(async move { transport.send_workflow(payload, tx, call_cancel).await });

        let mut trace = ExecutionTrace::default();
        let mut outputs: Option<Value> = None;
        let mut run_id: Option<String> = None;
        let finish = self
            .drive(rx, call, cancel, |event| {
                if let WorkflowEvent::WorkflowStarted {
                    workflow_run_id, ..
                } = &event
                {
                    run_id = Some(workflow_run_id.clone());
                }
                let remote = event.task_id().map(str::to_string);
                let outcome = trace::apply(&mut trace, &event);

                let snapshot = trace.clone();
                self.update(gen, move |s| {
                    s.phase = SessionPhase::Streaming;
                    s.text = snapshot.result_text.clone();
                    s.trace = Some(snapshot);
                    latch(&mut s.remote_task_id, remote);
                });

                match outcome? {
                    TraceOutcome::Succeeded { outputs: out } => {
                        outputs = out.map(Value::Object);
                        Some(Finish::Success)
                    }
                    TraceOutcome::Failed { error } => Some(Finish::Failure { error: Some(error) }),
                    TraceOutcome::Stopped => Some(Finish::Stopped),
                }
            })
            .await;

        let payload = match (&finish, outputs) {
            (Finish::Success, Some(outputs)) => CompletionPayload::Structured(outputs),
            (Finish::Success, None) => CompletionPayload::default(),
            _ => CompletionPayload::Text(trace.result_text),
        };
        self.conclude(gen, finish, payload, run_id)
    }

    /// Race the stream against the timeout and local cancellation.
    async fn drive<E, F>(
        &self,
        mut rx: mpsc::UnboundedReceiver<E>,
        mut call: JoinHandle<anyhow::Result<()>>,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Finish
    where
        E: StreamEvent,
        F: FnMut(E) -> Option<Finish>,
    {
        let deadline = tokio::time::sleep(self.inner.options.timeout);
        tokio::pin!(deadline);

        let mut stream_open = true;
        let mut call_done = false;

        loop {
            let finish = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    call.abort();
                    Finish::Aborted
                }

                event = rx.recv(), if stream_open => match event {
                    Some(event) => match on_event(event) {
                        Some(finish) => finish,
                        None => continue,
                    },
                    None => {
                        stream_open = false;
                        if !call_done {
                            continue;
                        }
                        Finish::Failure { error: Some(SessionError::StreamClosed.to_string()) }
                    }
                },

                res = &mut call, if !call_done => {
                    call_done = true;
                    match res {
                        Ok(Ok(())) if stream_open => continue,
                        Ok(Ok(())) => Finish::Failure { error: Some(SessionError::StreamClosed.to_string()) },
                        Ok(Err(err)) => Finish::Failure { error: Some(format!("{err:#}")) },
                        Err(join) => Finish::Failure { error: Some(join.to_string()) },
                    }
                }

                _ = &mut deadline => Finish::TimedOut,
            };

            if matches!(finish, Finish::TimedOut) && stream_open {
                watch_late_result(rx, self.inner.notifier.clone(), self.inner.options.task_id);
            }
            return finish;
        }
    }

    fn conclude(
        &self,
        gen: u64,
        finish: Finish,
        payload: CompletionPayload,
        message_id: Option<String>,
    ) -> Completion {
        let task_id = self.inner.options.task_id;
        let (phase, success) = match &finish {
            Finish::Success => (SessionPhase::Completed, true),
            Finish::Failure { .. } | Finish::Stopped => (SessionPhase::Failed, false),
            Finish::TimedOut => (SessionPhase::TimedOut, false),
            Finish::Aborted => (SessionPhase::Aborted, false),
        };

        if let Finish::Failure {
            error: Some(message),
        } = &finish
        {
            self.inner.notifier.error(message.clone(), task_id);
        }

        self.update(gen, |s| {
            s.phase = phase;
            s.is_responding = false;
            if success {
                s.message_id = message_id;
            }
        });

        tracing::info!(
            target: "genbatch.session",
            stage = "send.end",
            task_id = ?task_id,
            phase = ?phase,
            success,
        );

        Completion {
            payload,
            task_id,
            success,
            phase,
        }
    }
}

/// Keep the first non-blank remote task id.
fn latch(slot: &mut Option<String>, candidate: Option<String>) {
    if slot.is_some() {
        return;
    }
    if let Some(id) = candidate.filter(|id| !id.trim().is_empty()) {
        *slot = Some(id);
    }
}

/// After a timeout, warn once if the request still reaches a terminal event.
fn watch_late_result<E: StreamEvent>(
    mut rx: mpsc::UnboundedReceiver<E>,
    notifier: Notifier,
    task_id: Option<TaskId>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event.is_terminal() {
                notifier.warning(TIMEOUT_WARNING, task_id);
                break;
            }
        }
    });
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
