//! genbatch-core - batch scheduling and streaming execution of generation requests

pub mod batch;
pub mod config;
pub mod error;
pub mod notify;
pub mod schema;
pub mod session;
pub mod trace;
pub mod transport;
