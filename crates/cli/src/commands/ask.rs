//! `dexter ask`: run one query in-process and print its events.
//!
//! Each event is printed as one compact JSON line, exactly as the server
//! would put it in an SSE `data` field. Fails when the run ends in `error`.

use dexter_agent::StepLimits;
use dexter_core::RunEvent;
use dexter_gateway::{Dispatcher, RunRequest, SessionRegistry};
use futures::StreamExt;
use std::sync::Arc;

pub async fn run(
    query: String,
    max_steps: Option<u32>,
    max_steps_per_task: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let registry = Arc::new(SessionRegistry::new());
    let defaults = StepLimits::resolve(
        Some(config.runs.max_steps),
        Some(config.runs.max_steps_per_task),
    );
    let dispatcher = Dispatcher::new(registry.clone(), super::executor_factory(&config))
        .with_default_limits(defaults);

    let run_id = dispatcher.submit(RunRequest {
        query,
        max_steps: max_steps.map(i64::from),
        max_steps_per_task: max_steps_per_task.map(i64::from),
    });

    let session = registry
        .remove(&run_id)
        .ok_or_else(|| format!("run {run_id} vanished before streaming"))?;
    let mut stream = session
        .stream()
        .ok_or_else(|| format!("run {run_id} is already being streamed"))?;

    let mut failure = None;
    while let Some(event) = stream.next().await {
        println!("{}", dexter_gateway::sse::frame_data(&event));
        if let RunEvent::Error { message } = event {
            failure = Some(message);
        }
    }

    match failure {
        Some(message) => Err(format!("run failed: {message}").into()),
        None => Ok(()),
    }
}
