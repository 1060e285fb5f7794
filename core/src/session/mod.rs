//! Streaming session: one task's send → stream → complete/fail/timeout/abort.

mod payload;
#[allow(clippy::module_inception)]
mod session;
mod types;

pub use payload::build_payload;
pub use session::{GenerationSession, TIMEOUT_WARNING};
pub use types::{
    Completion, CompletionPayload, SessionOptions, SessionPhase, SessionSnapshot,
};
