#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genbatch_core::config::{AppConfig, AppMode};
use genbatch_core::notify::{Notice, Severity};
use genbatch_core::schema::{PromptVariable, VarType};
use genbatch_core::trace::{WorkflowEvent, WorkflowFinished, WorkflowRunStatus};
use genbatch_core::transport::{CompletionEvent, EventSink, Feedback, RequestPayload, Transport};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// What one transport call does: timed events, then optionally hang until
/// cancelled. A rejected script fails the call before any event.
#[derive(Clone)]
pub struct Script<E> {
    pub steps: Vec<(Duration, E)>,
    pub reject: Option<String>,
    pub hang: bool,
}

impl<E> Default for Script<E> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            reject: None,
            hang: false,
        }
    }
}

impl<E> Script<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, event: E) -> Self {
        self.after(Duration::ZERO, event)
    }

    pub fn after(mut self, delay: Duration, event: E) -> Self {
        self.steps.push((delay, event));
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Self::default()
        }
    }
}

type Scripter<E> = Box<dyn Fn(&RequestPayload) -> Script<E> + Send + Sync>;

/// In-memory [`Transport`] that plays back a script chosen per request.
pub struct ScriptedTransport {
    completion: Scripter<CompletionEvent>,
    workflow: Scripter<WorkflowEvent>,
    stop_error: Option<String>,
    feedback_error: Option<String>,
    pub calls: Mutex<Vec<RequestPayload>>,
    pub stops: Mutex<Vec<String>>,
    pub feedbacks: Mutex<Vec<(String, Feedback)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    fn with(completion: Scripter<CompletionEvent>, workflow: Scripter<WorkflowEvent>) -> Self {
        Self {
            completion,
            workflow,
            stop_error: None,
            feedback_error: None,
            calls: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            feedbacks: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn completion<F>(f: F) -> Self
    where
        F: Fn(&RequestPayload) -> Script<CompletionEvent> + Send + Sync + 'static,
    {
        Self::with(Box::new(f), Box::new(|_| Script::new()))
    }

    pub fn workflow<F>(f: F) -> Self
    where
        F: Fn(&RequestPayload) -> Script<WorkflowEvent> + Send + Sync + 'static,
    {
        Self::with(Box::new(|_| Script::new()), Box::new(f))
    }

    pub fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub fn with_feedback_error(mut self, message: &str) -> Self {
        self.feedback_error = Some(message.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn play<E: Send>(
        &self,
        script: Script<E>,
        events: EventSink<E>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = async {
            if let Some(message) = script.reject {
                anyhow::bail!(message);
            }
            for (delay, event) in script.steps {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                }
                if events.send(event).is_err() {
                    return Ok(());
                }
            }
            if script.hang {
                cancel.cancelled().await;
            }
            Ok(())
        }
        .await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_completion(
        &self,
        payload: RequestPayload,
        events: EventSink<CompletionEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let script = (self.completion)(&payload);
        self.calls.lock().unwrap().push(payload);
        self.play(script, events, cancel).await
    }

    async fn send_workflow(
        &self,
        payload: RequestPayload,
        events: EventSink<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let script = (self.workflow)(&payload);
        self.calls.lock().unwrap().push(payload);
        self.play(script, events, cancel).await
    }

    async fn stop_completion(&self, remote_task_id: &str) -> anyhow::Result<()> {
        self.stops.lock().unwrap().push(remote_task_id.to_string());
        match &self.stop_error {
            Some(message) => anyhow::bail!("{message}"),
            None => Ok(()),
        }
    }

    async fn stop_workflow(&self, remote_task_id: &str) -> anyhow::Result<()> {
        self.stop_completion(remote_task_id).await
    }

    async fn update_feedback(&self, message_id: &str, feedback: &Feedback) -> anyhow::Result<()> {
        if let Some(message) = &self.feedback_error {
            anyhow::bail!("{message}");
        }
        self.feedbacks
            .lock()
            .unwrap()
            .push((message_id.to_string(), feedback.clone()));
        Ok(())
    }
}

pub fn data(chunk: &str, task_id: Option<&str>, message_id: Option<&str>) -> CompletionEvent {
    CompletionEvent::Data {
        chunk: chunk.to_string(),
        is_first: false,
        message_id: message_id.map(str::to_string),
        task_id: task_id.map(str::to_string),
    }
}

pub fn workflow_started(task_id: &str) -> WorkflowEvent {
    WorkflowEvent::WorkflowStarted {
        workflow_run_id: format!("run-{task_id}"),
        task_id: task_id.to_string(),
    }
}

pub fn workflow_finished(status: WorkflowRunStatus, outputs: Option<Value>) -> WorkflowEvent {
    WorkflowEvent::WorkflowFinished(WorkflowFinished {
        status,
        error: None,
        outputs: outputs.and_then(|v| v.as_object().cloned()),
    })
}

pub fn outputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Text input under `key`, as a plain string.
pub fn input_text<'a>(payload: &'a RequestPayload, key: &str) -> &'a str {
    payload
        .inputs
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn question_schema() -> Vec<PromptVariable> {
    vec![PromptVariable::new("q", "Question", VarType::String).required()]
}

pub fn question_grid(rows: usize) -> Vec<Vec<String>> {
    let mut grid = vec![vec!["Question".to_string()]];
    grid.extend((1..=rows).map(|i| vec![format!("q{i}")]));
    grid
}

pub fn config(concurrency: usize, timeout_ms: u64, workflow: bool) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.batch.concurrency = concurrency;
    cfg.generation.timeout_ms = timeout_ms;
    if workflow {
        cfg.app.mode = AppMode::Workflow;
    }
    cfg
}

pub fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        out.push(notice);
    }
    out
}

pub fn of_severity(notices: &[Notice], severity: Severity) -> Vec<&Notice> {
    notices.iter().filter(|n| n.severity == severity).collect()
}

pub fn arc(transport: ScriptedTransport) -> Arc<ScriptedTransport> {
    Arc::new(transport)
}
