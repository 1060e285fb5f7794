mod batch;
#[allow(clippy::module_inception)]
mod error;
mod session;

pub use batch::BatchError;
pub use error::CliError;
pub use session::SessionError;
