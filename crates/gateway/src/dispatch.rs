//! Run submission: one session plus one blocking worker per run.

use crate::registry::{RunId, SessionRegistry};
use crate::session::RunEmitter;
use dexter_agent::{EventLogger, ExecutorFactory, StepLimits};
use dexter_core::RunEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Body of `POST /api/run`.
///
/// Limits are taken as plain integers; anything not positive or too large
/// for a step budget falls back to the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps_per_task: Option<i64>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_steps: None,
            max_steps_per_task: None,
        }
    }
}

/// Starts runs on the blocking pool.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn ExecutorFactory>,
    defaults: StepLimits,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            registry,
            factory,
            defaults: StepLimits::default(),
        }
    }

    /// Limits used when a request leaves them unset or zero.
    pub fn with_default_limits(mut self, defaults: StepLimits) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a session, start its worker, and return the run id at once.
    ///
    /// Must be called from within a tokio runtime. Failures of the run are
    /// reported later as the terminal `error` event, never here.
    pub fn submit(&self, request: RunRequest) -> RunId {
        let (session, emitter) = self.registry.create();
        let run_id = session.run_id().clone();
        let limits = StepLimits::resolve_with(
            step_budget(request.max_steps),
            step_budget(request.max_steps_per_task),
            self.defaults,
        );

        info!(
            run_id = %run_id,
            max_steps = limits.max_steps,
            max_steps_per_task = limits.max_steps_per_task,
            "Run submitted"
        );

        let factory = self.factory.clone();
        let worker_emitter = emitter.clone();
        let worker = tokio::task::spawn_blocking(move || {
            run_worker(factory.as_ref(), limits, &request.query, &worker_emitter);
        });

        // A panicking worker never reaches its own error handling.
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                error!(run_id = %emitter.run_id(), error = %e, "Run worker crashed");
                emitter.fail(format!("Run worker crashed: {e}"));
                emitter.mark_finished();
            }
        });

        run_id
    }
}

fn step_budget(requested: Option<i64>) -> Option<u32> {
    requested.and_then(|n| u32::try_from(n).ok())
}

/// Worker body. Every failure becomes the run's `error` event.
fn run_worker(
    factory: &dyn ExecutorFactory,
    limits: StepLimits,
    query: &str,
    emitter: &RunEmitter,
) {
    let run_id = emitter.run_id().clone();
    info!(run_id = %run_id, "Starting run");

    let logger = EventLogger::new(emitter.clone());
    let result = factory
        .build(limits, logger)
        .and_then(|mut executor| executor.run(query));

    match result {
        Ok(answer) => {
            info!(run_id = %run_id, "Run completed");
            emitter.emit(RunEvent::Done { answer });
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Run failed");
            emitter.fail(e.to_string());
        }
    }

    emitter.mark_finished();
}
