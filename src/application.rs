//! Application layer - source runs and their orchestration

pub mod orchestrator;
pub mod pipeline;

pub use orchestrator::{CollectReport, SourceJob, collect, install_interrupt_handler, merge_outputs, run_sources};
pub use pipeline::{SourceOutcome, SourceRunner, SourceStatus};
