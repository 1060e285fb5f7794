use std::{error::Error as StdError, fmt, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use genbatch_core::config::HttpTransportConfig;
use genbatch_core::trace::WorkflowEvent;
use genbatch_core::transport::{
    CompletionEvent, EventSink, Feedback, RequestPayload, Transport,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::sse::{decode_workflow, CompletionDecoder, SseDecoder};

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpTransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Status,
    Unknown,
}

impl HttpTransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HttpTransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct HttpTransportError {
    kind: HttpTransportErrorKind,
    status: Option<u16>,
    url: Option<String>,
    message: String,
    source: Option<anyhow::Error>,
}

impl HttpTransportError {
    pub fn kind(&self) -> HttpTransportErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_reqwest(err: reqwest::Error, url: String) -> Self {
        let kind = if err.is_timeout() {
            HttpTransportErrorKind::Timeout
        } else if err.is_connect() {
            HttpTransportErrorKind::Connect
        } else if err.is_request() {
            HttpTransportErrorKind::Request
        } else if err.is_body() {
            HttpTransportErrorKind::Body
        } else if err.is_decode() {
            HttpTransportErrorKind::Decode
        } else {
            HttpTransportErrorKind::Unknown
        };
        HttpTransportError {
            kind,
            status: err.status().map(|s| s.as_u16()),
            url: Some(url),
            message: err.to_string(),
            source: Some(anyhow::Error::new(err)),
        }
    }

    /// Non-2xx reply. The API answers with `{"message": ...}`; fall back to
    /// the raw body preview otherwise.
    fn status_error(status: u16, url: String, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| preview_body(body));
        HttpTransportError {
            kind: HttpTransportErrorKind::Status,
            status: Some(status),
            url: Some(url),
            message,
            source: None,
        }
    }

    fn decode_error(url: String, err: anyhow::Error) -> Self {
        HttpTransportError {
            kind: HttpTransportErrorKind::Decode,
            status: None,
            url: Some(url),
            message: format!("{err:#}"),
            source: Some(err),
        }
    }
}

impl fmt::Display for HttpTransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport http error kind={}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        if let Some(url) = &self.url {
            write!(f, " url={}", url)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for HttpTransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().nth(BODY_PREVIEW_LIMIT).is_some() {
        out.push_str("...");
    }
    out
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .map_err(|err| HttpTransportError::from_reqwest(err, url.clone()))?;
    Err(HttpTransportError::status_error(status.as_u16(), url, &body).into())
}

/// Streaming client for the generation API.
#[derive(Clone)]
pub struct HttpTransport {
    api_key: String,
    user: String,
    /// No overall timeout: streams run as long as the session allows.
    stream_http: reqwest::Client,
    control_http: reqwest::Client,
    base: String,
    url_completion: String,
    url_workflow: String,
}

impl HttpTransport {
    pub fn new(cfg: &HttpTransportConfig) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.request_timeout_ms);
        let stream_http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        let control_http = reqwest::Client::builder().timeout(timeout).build()?;
        let base = cfg.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            api_key: cfg.api_key.clone(),
            user: cfg.user.clone(),
            stream_http,
            control_http,
            url_completion: format!("{}/completion-messages", base),
            url_workflow: format!("{}/workflows/run", base),
            base,
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    fn body(&self, payload: &RequestPayload) -> Result<Value> {
        let mut body = serde_json::to_value(payload)?;
        body["response_mode"] = json!("streaming");
        body["user"] = json!(self.user);
        Ok(body)
    }

    async fn open_stream(&self, url: &str, payload: &RequestPayload) -> Result<reqwest::Response> {
        let body = self.body(payload)?;
        let req = self.stream_http.post(url).json(&body);
        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| HttpTransportError::from_reqwest(err, url.to_string()))?;
        ensure_success(resp).await
    }

    /// Pump `data:` payloads through `decode` into `events` until a terminal
    /// event, the end of the body, or cancellation.
    async fn pump<E, D>(
        &self,
        resp: reqwest::Response,
        events: EventSink<E>,
        cancel: CancellationToken,
        mut decode: D,
        is_terminal: fn(&E) -> bool,
    ) -> Result<()>
    where
        D: FnMut(&str) -> Result<Option<E>>,
    {
        let url = resp.url().to_string();
        let mut body = resp.bytes_stream();
        let mut sse = SseDecoder::new();
        let mut delivered = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!(target: "genbatch.transport", stage = "stream.cancelled", url = %url, delivered);
                    return Ok(());
                }
                chunk = body.next() => chunk,
            };

            let ended = chunk.is_none();
            let payloads = match chunk {
                Some(Ok(bytes)) => sse.push(&bytes),
                Some(Err(err)) => return Err(HttpTransportError::from_reqwest(err, url).into()),
                None => sse.finish().into_iter().collect(),
            };

            for data in payloads {
                let event = decode(&data)
                    .map_err(|err| HttpTransportError::decode_error(url.clone(), err))?;
                let Some(event) = event else { continue };
                let terminal = is_terminal(&event);
                if events.send(event).is_err() {
                    return Ok(());
                }
                delivered += 1;
                if terminal {
                    tracing::debug!(target: "genbatch.transport", stage = "stream.end", url = %url, delivered);
                    return Ok(());
                }
            }

            if ended {
                tracing::warn!(target: "genbatch.transport", stage = "stream.eof", url = %url, delivered, "stream ended without a terminal event");
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send_completion(
        &self,
        payload: RequestPayload,
        events: EventSink<CompletionEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", stage = "completion.open", url = %self.url_completion);
        let resp = self.open_stream(&self.url_completion, &payload).await?;
        let mut decoder = CompletionDecoder::new();
        self.pump(
            resp,
            events,
            cancel,
            |data| decoder.decode(data),
            CompletionEvent::is_terminal,
        )
        .await
    }

    async fn send_workflow(
        &self,
        payload: RequestPayload,
        events: EventSink<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", stage = "workflow.open", url = %self.url_workflow);
        let resp = self.open_stream(&self.url_workflow, &payload).await?;
        self.pump(resp, events, cancel, decode_workflow, WorkflowEvent::is_terminal)
            .await
    }

    async fn stop_completion(&self, remote_task_id: &str) -> Result<()> {
        let url = format!("{}/completion-messages/{}/stop", self.base, remote_task_id);
        self.post_control(url, json!({ "user": self.user })).await
    }

    async fn stop_workflow(&self, remote_task_id: &str) -> Result<()> {
        let url = format!("{}/workflows/tasks/{}/stop", self.base, remote_task_id);
        self.post_control(url, json!({ "user": self.user })).await
    }

    async fn update_feedback(&self, message_id: &str, feedback: &Feedback) -> Result<()> {
        let url = format!("{}/messages/{}/feedbacks", self.base, message_id);
        let mut body = serde_json::to_value(feedback)?;
        body["user"] = json!(self.user);
        self.post_control(url, body).await
    }
}

impl HttpTransport {
    async fn post_control(&self, url: String, body: Value) -> Result<()> {
        tracing::debug!(target: "genbatch.transport", stage = "control.in", url = %url);
        let req = self.control_http.post(&url).json(&body);
        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| HttpTransportError::from_reqwest(err, url.clone()))?;
        let status = resp.status();
        ensure_success(resp).await?;
        tracing::debug!(target: "genbatch.transport", stage = "control.out", url = %url, status = %status);
        Ok(())
    }
}
