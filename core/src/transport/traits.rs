use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{CompletionEvent, Feedback, RequestPayload};
use crate::trace::WorkflowEvent;

/// Channel the transport pushes streamed events into.
pub type EventSink<E> = mpsc::UnboundedSender<E>;

/// Backend contract consumed by the streaming session.
///
/// `send_*` resolve once the stream is over. Implementations must deliver
/// events in causal order, emit exactly one terminal event per call, and
/// return promptly once `cancel` fires. An `Err` return means the request
/// itself was rejected.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send_completion(
        &self,
        payload: RequestPayload,
        events: EventSink<CompletionEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;

    async fn send_workflow(
        &self,
        payload: RequestPayload,
        events: EventSink<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;

    async fn stop_completion(&self, remote_task_id: &str) -> anyhow::Result<()>;

    async fn stop_workflow(&self, remote_task_id: &str) -> anyhow::Result<()>;

    async fn update_feedback(&self, message_id: &str, feedback: &Feedback) -> anyhow::Result<()>;
}
