//! Run progress events.
//!
//! A run reports its progress as an ordered sequence of [`RunEvent`]s. The
//! wire form is a JSON object discriminated by `type`:
//!
//! - `log`, `header`       free-form progress text
//! - `user_query`          the query being worked on
//! - `task_list`           the planned tasks
//! - `task_start`, `task_done`
//! - `tool_run`            a tool finished, optionally with its result
//! - `warning`             a risky action was auto-confirmed
//! - `answer`              the executor's summary
//! - `progress`            start / complete / error of a scoped step
//! - `done`, `error`       terminal; nothing follows them

use serde::{Deserialize, Serialize};

/// Events emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Log {
        message: String,
    },

    Header {
        message: String,
    },

    UserQuery {
        query: String,
    },

    TaskList {
        tasks: Vec<TaskDescriptor>,
    },

    TaskStart {
        task: String,
    },

    TaskDone {
        task: String,
    },

    ToolRun {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<ToolOutput>,
    },

    Warning {
        tool: String,
        input: String,
        message: String,
    },

    Answer {
        answer: String,
    },

    Progress {
        status: ProgressStatus,
        message: String,
    },

    /// The run completed with a final answer.
    Done {
        answer: String,
    },

    /// The run failed.
    Error {
        message: String,
    },
}

impl RunEvent {
    /// Wire name of this event (the `type` discriminant).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Header { .. } => "header",
            Self::UserQuery { .. } => "user_query",
            Self::TaskList { .. } => "task_list",
            Self::TaskStart { .. } => "task_start",
            Self::TaskDone { .. } => "task_done",
            Self::ToolRun { .. } => "tool_run",
            Self::Warning { .. } => "warning",
            Self::Answer { .. } => "answer",
            Self::Progress { .. } => "progress",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// `done` and `error` end a run's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A planned task as reported in a `task_list` event.
///
/// Keys other than `description` and `done` are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub description: String,

    #[serde(default)]
    pub done: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            done: false,
            extra: serde_json::Map::new(),
        }
    }
}

/// Result attached to a `tool_run` event.
///
/// Serialized as the bare value: a decoded JSON value stays structured, a
/// result that did not decode is sent as the original string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Raw(String),
    Structured(serde_json::Value),
}

impl ToolOutput {
    /// Decode tool output text, falling back to the raw text.
    ///
    /// A JSON `null` counts as "nothing decoded" and keeps the raw text.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Null) | Err(_) => Self::Raw(text.to_string()),
            Ok(value) => Self::Structured(value),
        }
    }
}

/// Phase of a scoped `progress` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Start,
    Complete,
    Error,
}
