//! Single-shot executor: answers the query with one LLM call.
//!
//! Used by the binary when no planning executor is plugged in.

use crate::event_logger::EventLogger;
use crate::executor::{ExecutorError, ExecutorFactory, StepLimits, TaskExecutor};
use dexter_providers::{LlmCall, LlmInvoker};
use std::sync::Arc;
use tracing::debug;

pub struct DirectExecutor {
    invoker: Arc<LlmInvoker>,
    logger: EventLogger,
    limits: StepLimits,
}

impl DirectExecutor {
    pub fn new(invoker: Arc<LlmInvoker>, limits: StepLimits, logger: EventLogger) -> Self {
        Self {
            invoker,
            logger,
            limits,
        }
    }
}

impl TaskExecutor for DirectExecutor {
    fn run(&mut self, query: &str) -> Result<String, ExecutorError> {
        if self.limits.max_steps == 0 {
            return Err(ExecutorError::StepLimit { max_steps: 0 });
        }

        self.logger.log_header(format!("Dexter · {}", self.invoker.model()));
        self.logger.log_user_query(query);

        let output = self.logger.progress("Thinking...", None, || {
            self.invoker.call_blocking(LlmCall::new(query))
        })?;

        let answer = output.into_text();
        debug!(len = answer.len(), "Direct executor produced an answer");
        self.logger.log_summary(answer.clone());
        Ok(answer)
    }
}

/// Builds a [`DirectExecutor`] per run over a shared invoker.
#[derive(Clone)]
pub struct DirectExecutorFactory {
    invoker: Arc<LlmInvoker>,
}

impl DirectExecutorFactory {
    pub fn new(invoker: Arc<LlmInvoker>) -> Self {
        Self { invoker }
    }
}

impl ExecutorFactory for DirectExecutorFactory {
    fn build(
        &self,
        limits: StepLimits,
        logger: EventLogger,
    ) -> Result<Box<dyn TaskExecutor>, ExecutorError> {
        Ok(Box::new(DirectExecutor::new(
            self.invoker.clone(),
            limits,
            logger,
        )))
    }
}
