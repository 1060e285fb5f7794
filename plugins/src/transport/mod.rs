pub mod http;
pub mod replay;
pub mod sse;

pub use http::{HttpTransport, HttpTransportError, HttpTransportErrorKind};
pub use replay::ReplayTransport;
