pub mod collect;
pub mod deliver;
pub mod digest;
pub mod executor;
pub mod inference;
pub mod pipeline;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use pipeline::{Orchestrator, PipelineDeps, PipelineError, RunResult, RunSummary};
