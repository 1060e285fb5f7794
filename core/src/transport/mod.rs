//! Boundary contract with the streaming backend.

mod traits;
mod types;

pub use traits::{EventSink, Transport};
pub use types::{AttachedFile, CompletionEvent, Feedback, Rating, RequestPayload, TransferMethod};
