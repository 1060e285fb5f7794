use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use genbatch_core::config::ReplayTransportConfig;
use genbatch_core::trace::WorkflowEvent;
use genbatch_core::transport::{CompletionEvent, EventSink, Feedback, RequestPayload, Transport};
use tokio_util::sync::CancellationToken;

use super::sse::{decode_workflow, CompletionDecoder};

/// Plays back a recorded stream: one JSON event per line, optionally with
/// the `data:` prefix still attached. Completion and workflow requests read
/// the same file and skip the events that belong to the other mode.
pub struct ReplayTransport {
    script: String,
    delay: Duration,
}

impl ReplayTransport {
    pub fn new(cfg: &ReplayTransportConfig) -> Self {
        Self {
            script: cfg.script.clone(),
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }

    async fn lines(&self) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(&self.script)
            .await
            .with_context(|| format!("failed to read replay script {}", self.script))?;
        Ok(content
            .lines()
            .map(|line| line.trim())
            .map(|line| line.strip_prefix("data:").unwrap_or(line).trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    async fn play<E, D>(
        &self,
        events: EventSink<E>,
        cancel: CancellationToken,
        mut decode: D,
        is_terminal: fn(&E) -> bool,
    ) -> Result<()>
    where
        D: FnMut(&str) -> Result<Option<E>>,
    {
        for (idx, line) in self.lines().await?.iter().enumerate() {
            let event = decode(line).with_context(|| format!("{}:{}", self.script, idx + 1))?;
            let Some(event) = event else { continue };

            if !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            } else if cancel.is_cancelled() {
                return Ok(());
            }

            let terminal = is_terminal(&event);
            if events.send(event).is_err() || terminal {
                return Ok(());
            }
        }
        tracing::warn!(target: "genbatch.transport", script = %self.script, "replay script has no terminal event");
        Ok(())
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    fn name(&self) -> &str {
        "replay"
    }

    async fn send_completion(
        &self,
        _payload: RequestPayload,
        events: EventSink<CompletionEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut decoder = CompletionDecoder::new();
        self.play(events, cancel, |line| decoder.decode(line), CompletionEvent::is_terminal)
            .await
    }

    async fn send_workflow(
        &self,
        _payload: RequestPayload,
        events: EventSink<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.play(events, cancel, decode_workflow, WorkflowEvent::is_terminal)
            .await
    }

    async fn stop_completion(&self, remote_task_id: &str) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", remote_task_id, "replay stop");
        Ok(())
    }

    async fn stop_workflow(&self, remote_task_id: &str) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", remote_task_id, "replay stop");
        Ok(())
    }

    async fn update_feedback(&self, message_id: &str, _feedback: &Feedback) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", message_id, "replay feedback");
        Ok(())
    }
}
