//! # Dexter Core
//!
//! Domain types, traits, and error definitions shared by every Dexter crate:
//! chat messages, the LLM [`Provider`] trait, and the [`RunEvent`] vocabulary
//! a run reports its progress in.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;

pub use error::{Error, ProviderError, Result};
pub use event::{ProgressStatus, RunEvent, TaskDescriptor, ToolOutput};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, ResponseFormat, ToolChoice, ToolDefinition,
    Usage,
};
