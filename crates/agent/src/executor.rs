//! The task-executor seam.
//!
//! A run is one [`TaskExecutor::run`] call on a blocking worker thread. The
//! server only knows how to build an executor (through an
//! [`ExecutorFactory`]) and what it returns; how the executor plans and uses
//! tools is its own business.

use crate::event_logger::EventLogger;
use dexter_core::ProviderError;

pub const DEFAULT_MAX_STEPS: u32 = 20;
pub const DEFAULT_MAX_STEPS_PER_TASK: u32 = 5;

/// Step budgets handed to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    pub max_steps: u32,
    pub max_steps_per_task: u32,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_steps_per_task: DEFAULT_MAX_STEPS_PER_TASK,
        }
    }
}

impl StepLimits {
    /// Resolve requested limits; missing or zero values take the defaults.
    pub fn resolve(max_steps: Option<u32>, max_steps_per_task: Option<u32>) -> Self {
        Self::resolve_with(max_steps, max_steps_per_task, Self::default())
    }

    /// Like [`resolve`](Self::resolve) with explicit fallbacks.
    pub fn resolve_with(
        max_steps: Option<u32>,
        max_steps_per_task: Option<u32>,
        fallback: StepLimits,
    ) -> Self {
        Self {
            max_steps: max_steps
                .filter(|&n| n > 0)
                .unwrap_or(fallback.max_steps),
            max_steps_per_task: max_steps_per_task
                .filter(|&n| n > 0)
                .unwrap_or(fallback.max_steps_per_task),
        }
    }
}

/// Why an executor gave up.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Step limit of {max_steps} reached")]
    StepLimit { max_steps: u32 },

    #[error("{0}")]
    Failed(String),
}

/// Performs one run. Synchronous; may block on LLM calls.
pub trait TaskExecutor: Send {
    fn run(&mut self, query: &str) -> Result<String, ExecutorError>;
}

/// Builds a fresh executor per run.
pub trait ExecutorFactory: Send + Sync {
    fn build(
        &self,
        limits: StepLimits,
        logger: EventLogger,
    ) -> Result<Box<dyn TaskExecutor>, ExecutorError>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(StepLimits, EventLogger) -> Result<Box<dyn TaskExecutor>, ExecutorError> + Send + Sync,
{
    fn build(
        &self,
        limits: StepLimits,
        logger: EventLogger,
    ) -> Result<Box<dyn TaskExecutor>, ExecutorError> {
        self(limits, logger)
    }
}
