//! Batch scheduling: tabular input → bounded pool of streaming tasks.

mod events;
mod runner;
mod scheduler;
mod types;
mod validate;
pub mod views;

pub use events::BatchEvent;
pub use runner::{BatchRunner, BatchSummary};
pub use scheduler::BatchScheduler;
pub use types::{Task, TaskId, TaskParams, TaskStatus};
pub use validate::validate_grid;
pub use views::ExportRow;
