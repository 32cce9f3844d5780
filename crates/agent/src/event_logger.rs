//! Progress reporting for task executors.
//!
//! An executor never talks to the transport directly. It calls named
//! progress methods on an [`EventLogger`], which turns each call into a
//! [`RunEvent`] and hands it to an [`EventSink`]. Sinks are called from the
//! executor's worker thread and must not block.

use dexter_core::{ProgressStatus, RunEvent, TaskDescriptor, ToolOutput};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

/// Destination for run events. Called from the worker thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

impl<F> EventSink for F
where
    F: Fn(RunEvent) + Send + Sync,
{
    fn emit(&self, event: RunEvent) {
        self(event)
    }
}

/// Maps executor progress calls to [`RunEvent`]s.
pub struct EventLogger {
    sink: Arc<dyn EventSink>,
    history: Mutex<Vec<String>>,
}

impl EventLogger {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self::from_arc(Arc::new(sink))
    }

    pub fn from_arc(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Plain `log` messages emitted so far, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn emit(&self, event: RunEvent) {
        self.sink.emit(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        if let Ok(mut history) = self.history.lock() {
            history.push(message.clone());
        }
        self.emit(RunEvent::Log { message });
    }

    pub fn log_header(&self, message: impl Into<String>) {
        self.emit(RunEvent::Header {
            message: message.into(),
        });
    }

    pub fn log_user_query(&self, query: impl Into<String>) {
        self.emit(RunEvent::UserQuery {
            query: query.into(),
        });
    }

    pub fn log_task_list(&self, tasks: Vec<TaskDescriptor>) {
        self.emit(RunEvent::TaskList { tasks });
    }

    pub fn log_task_start(&self, task: impl Into<String>) {
        self.emit(RunEvent::TaskStart { task: task.into() });
    }

    pub fn log_task_done(&self, task: impl Into<String>) {
        self.emit(RunEvent::TaskDone { task: task.into() });
    }

    /// Report a finished tool. An empty `result` is omitted from the event.
    pub fn log_tool_run(&self, tool: impl Into<String>, result: &str) {
        let result = (!result.is_empty()).then(|| ToolOutput::from_text(result));
        self.emit(RunEvent::ToolRun {
            tool: tool.into(),
            result,
        });
    }

    /// Report a risky action. Always auto-confirmed; never waits for input.
    pub fn log_risky(&self, tool: impl Into<String>, input: impl Into<String>) {
        let tool = tool.into();
        let input = input.into();
        let message = format!("Risky action {tool}({input}) — auto-confirmed");
        self.emit(RunEvent::Warning {
            tool,
            input,
            message,
        });
    }

    pub fn log_summary(&self, summary: impl Into<String>) {
        self.emit(RunEvent::Answer {
            answer: summary.into(),
        });
    }

    /// Run `f` as a reported step.
    ///
    /// Emits `start`, then `complete` with `success` (or `message` with its
    /// trailing `...` turned into ` ✓`) when `f` succeeds. When `f` fails,
    /// emits `error` with `"<message> failed: <e>"` and returns the error.
    pub fn progress<T, E, F>(&self, message: &str, success: Option<&str>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        self.emit(RunEvent::Progress {
            status: ProgressStatus::Start,
            message: message.to_string(),
        });

        match f() {
            Ok(value) => {
                let completed = match success {
                    Some(s) if !s.is_empty() => s.to_string(),
                    _ => completion_message(message),
                };
                self.emit(RunEvent::Progress {
                    status: ProgressStatus::Complete,
                    message: completed,
                });
                Ok(value)
            }
            Err(e) => {
                self.emit(RunEvent::Progress {
                    status: ProgressStatus::Error,
                    message: format!("{message} failed: {e}"),
                });
                Err(e)
            }
        }
    }
}

fn completion_message(message: &str) -> String {
    match message.strip_suffix("...") {
        Some(stem) => format!("{stem} ✓"),
        None => message.to_string(),
    }
}
