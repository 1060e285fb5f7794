//! Server-sent-event framing and the JSON event vocabulary of the
//! generation API.

use anyhow::{Context, Result};
use genbatch_core::trace::{NodeTrace, WorkflowEvent, WorkflowFinished, WorkflowRunStatus};
use genbatch_core::transport::CompletionEvent;
use serde::Deserialize;

/// Splits a byte stream into `data:` payloads.
///
/// Chunks may cut lines (and UTF-8 sequences) anywhere, so bytes are held
/// until a newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the complete `data:` payloads it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = data_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        data_line(&line)
    }
}

fn data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    Some(data.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CompletionWire {
    Message {
        #[serde(default)]
        answer: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        task_id: Option<String>,
    },
    MessageReplace {
        #[serde(default)]
        answer: String,
    },
    MessageEnd,
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

/// Stateful decoder for completion streams; tracks the first chunk.
#[derive(Debug, Default)]
pub struct CompletionDecoder {
    seen_data: bool,
}

impl CompletionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` for events with no meaning here (pings, agent chatter).
    pub fn decode(&mut self, data: &str) -> Result<Option<CompletionEvent>> {
        let wire: CompletionWire =
            serde_json::from_str(data).with_context(|| format!("invalid stream event: {data}"))?;
        let event = match wire {
            CompletionWire::Message {
                answer,
                message_id,
                task_id,
            } => {
                let is_first = !self.seen_data;
                self.seen_data = true;
                CompletionEvent::Data {
                    chunk: answer,
                    is_first,
                    message_id,
                    task_id,
                }
            }
            CompletionWire::MessageReplace { answer } => CompletionEvent::MessageReplace { answer },
            CompletionWire::MessageEnd => CompletionEvent::Completed,
            CompletionWire::Error { message } => CompletionEvent::Error {
                message: non_empty(message),
            },
            CompletionWire::Other => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Deserialize)]
struct TextData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkflowWire {
    WorkflowStarted {
        #[serde(default)]
        task_id: String,
        #[serde(default)]
        workflow_run_id: String,
    },
    NodeStarted { data: NodeTrace },
    NodeRetry { data: NodeTrace },
    NodeFinished { data: NodeTrace },
    IterationStarted { data: NodeTrace },
    IterationNext { data: NodeTrace },
    IterationCompleted { data: NodeTrace },
    LoopStarted { data: NodeTrace },
    LoopNext { data: NodeTrace },
    LoopCompleted { data: NodeTrace },
    TextChunk { data: TextData },
    TextReplace { data: TextData },
    WorkflowFinished { data: WorkflowFinished },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

/// Decode one workflow stream payload. A stream-level `error` event ends
/// the run, so it is reported as a failed finish.
pub fn decode_workflow(data: &str) -> Result<Option<WorkflowEvent>> {
    let wire: WorkflowWire =
        serde_json::from_str(data).with_context(|| format!("invalid stream event: {data}"))?;
    let event = match wire {
        WorkflowWire::WorkflowStarted {
            task_id,
            workflow_run_id,
        } => WorkflowEvent::WorkflowStarted {
            workflow_run_id,
            task_id,
        },
        WorkflowWire::NodeStarted { data } => WorkflowEvent::NodeStarted(data),
        WorkflowWire::NodeRetry { data } => WorkflowEvent::NodeRetry(data),
        WorkflowWire::NodeFinished { data } => WorkflowEvent::NodeFinished(data),
        WorkflowWire::IterationStarted { data } => WorkflowEvent::IterationStarted(data),
        WorkflowWire::IterationNext { data } => WorkflowEvent::IterationNext(data),
        WorkflowWire::IterationCompleted { data } => WorkflowEvent::IterationFinished(data),
        WorkflowWire::LoopStarted { data } => WorkflowEvent::LoopStarted(data),
        WorkflowWire::LoopNext { data } => WorkflowEvent::LoopNext(data),
        WorkflowWire::LoopCompleted { data } => WorkflowEvent::LoopFinished(data),
        WorkflowWire::TextChunk { data } => WorkflowEvent::TextChunk { text: data.text },
        WorkflowWire::TextReplace { data } => WorkflowEvent::TextReplace { text: data.text },
        WorkflowWire::WorkflowFinished { data } => WorkflowEvent::WorkflowFinished(data),
        WorkflowWire::Error { message } => WorkflowEvent::WorkflowFinished(WorkflowFinished {
            status: WorkflowRunStatus::Failed,
            error: Some(non_empty(message)),
            outputs: None,
        }),
        WorkflowWire::Other => return Ok(None),
    };
    Ok(Some(event))
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "unknown stream error".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genbatch_core::trace::NodeStatus;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\n\ndata:{\"b\":2}\r\n"), vec![
            "{\"a\":1}".to_string(),
            "{\"b\":2}".to_string()
        ]);
        assert!(decoder.push(b"event: ping\n: comment\n").is_empty());
        decoder.push(b"data: tail");
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn test_decoder_keeps_multibyte_chars_across_chunks() {
        let mut decoder = SseDecoder::new();
        let line = "data: héllo\n".as_bytes();
        let (a, b) = line.split_at(8);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_completion_events() {
        let mut decoder = CompletionDecoder::new();
        let first = decoder
            .decode(r#"{"event":"message","answer":"Hi","task_id":"t1","message_id":"m1"}"#)
            .unwrap();
        assert_eq!(
            first,
            Some(CompletionEvent::Data {
                chunk: "Hi".into(),
                is_first: true,
                message_id: Some("m1".into()),
                task_id: Some("t1".into()),
            })
        );
        let second = decoder
            .decode(r#"{"event":"message","answer":"!"}"#)
            .unwrap();
        assert!(matches!(second, Some(CompletionEvent::Data { is_first: false, .. })));
        assert_eq!(
            decoder.decode(r#"{"event":"message_end","id":"m1"}"#).unwrap(),
            Some(CompletionEvent::Completed)
        );
        assert_eq!(decoder.decode(r#"{"event":"ping"}"#).unwrap(), None);
        assert_eq!(
            decoder.decode(r#"{"event":"error","message":""}"#).unwrap(),
            Some(CompletionEvent::Error {
                message: "unknown stream error".into()
            })
        );
        assert!(decoder.decode("not json").is_err());
    }

    #[test]
    fn test_workflow_events() {
        let started = decode_workflow(
            r#"{"event":"workflow_started","task_id":"t1","workflow_run_id":"r1","data":{"id":"r1"}}"#,
        )
        .unwrap();
        assert_eq!(
            started,
            Some(WorkflowEvent::WorkflowStarted {
                workflow_run_id: "r1".into(),
                task_id: "t1".into(),
            })
        );

        let node = decode_workflow(
            r#"{"event":"node_finished","task_id":"t1","data":{"id":"e1","node_id":"llm","title":"LLM","status":"succeeded","execution_metadata":{"parallel_id":"p1"}}}"#,
        )
        .unwrap();
        let Some(WorkflowEvent::NodeFinished(node)) = node else {
            panic!("expected node_finished, got {node:?}");
        };
        assert_eq!(node.status, NodeStatus::Succeeded);
        assert_eq!(node.parallel_id(), Some("p1"));

        assert!(matches!(
            decode_workflow(r#"{"event":"loop_completed","data":{"node_id":"loop"}}"#).unwrap(),
            Some(WorkflowEvent::LoopFinished(_))
        ));
        assert_eq!(
            decode_workflow(r#"{"event":"text_chunk","data":{"text":"ab"}}"#).unwrap(),
            Some(WorkflowEvent::TextChunk { text: "ab".into() })
        );
        assert_eq!(decode_workflow(r#"{"event":"tts_message"}"#).unwrap(), None);
    }

    #[test]
    fn test_workflow_finish_and_error() {
        let finished = decode_workflow(
            r#"{"event":"workflow_finished","data":{"status":"partial-succeeded","outputs":{"answer":"x"}}}"#,
        )
        .unwrap();
        let Some(WorkflowEvent::WorkflowFinished(finished)) = finished else {
            panic!("expected workflow_finished");
        };
        assert_eq!(finished.status, WorkflowRunStatus::PartialSucceeded);
        assert_eq!(finished.outputs.unwrap()["answer"], "x");

        let error = decode_workflow(r#"{"event":"error","message":"boom","status":500}"#).unwrap();
        assert_eq!(
            error,
            Some(WorkflowEvent::WorkflowFinished(WorkflowFinished {
                status: WorkflowRunStatus::Failed,
                error: Some("boom".into()),
                outputs: None,
            }))
        );
    }
}
