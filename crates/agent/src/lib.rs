//! Task execution for Dexter runs.
//!
//! - [`TaskExecutor`] / [`ExecutorFactory`]: the seam a run executes through
//! - [`EventLogger`]: turns executor progress calls into [`RunEvent`]s
//! - [`DirectExecutor`]: a single-shot executor over the [`LlmInvoker`]
//!
//! [`RunEvent`]: dexter_core::RunEvent
//! [`LlmInvoker`]: dexter_providers::LlmInvoker

pub mod direct;
pub mod event_logger;
pub mod executor;

#[cfg(test)]
mod test_helpers;

pub use direct::{DirectExecutor, DirectExecutorFactory};
pub use event_logger::{EventLogger, EventSink};
pub use executor::{
    DEFAULT_MAX_STEPS, DEFAULT_MAX_STEPS_PER_TASK, ExecutorError, ExecutorFactory, StepLimits,
    TaskExecutor,
};
