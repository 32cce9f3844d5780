//! The invocation layer: one entry point for every LLM call a run makes.
//!
//! An [`LlmInvoker`] turns an [`LlmCall`] into a provider request (system +
//! user message, optional structured-output or tool binding), sends it with
//! retry on transient connection failures, and interprets the response.
//!
//! Executors run on blocking worker threads, so [`LlmInvoker::call_blocking`]
//! drives the async call on the runtime captured at construction.

use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::retry::{RetryPolicy, with_retry};
use dexter_config::{AppConfig, StructuredOutputMode, ToolBindMode};
use dexter_core::provider::*;
use dexter_core::{Message, ProviderError};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

/// A schema the response must conform to.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single LLM invocation.
#[derive(Debug, Clone)]
pub struct LlmCall {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub output_schema: Option<OutputSchema>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmCall {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            output_schema: None,
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// What an invocation produced.
#[derive(Debug, Clone)]
pub enum LlmOutput {
    /// The assistant message as returned (plain calls, tool binding, or
    /// structured output with mode `none`)
    Message(ProviderResponse),

    /// A value conforming to the requested output schema
    Structured(serde_json::Value),
}

impl LlmOutput {
    pub fn as_message(&self) -> Option<&ProviderResponse> {
        match self {
            Self::Message(response) => Some(response),
            Self::Structured(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<serde_json::Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Message(_) => None,
        }
    }

    /// Message text, or the compact JSON of a structured value.
    pub fn into_text(self) -> String {
        match self {
            Self::Message(response) => response.message.content,
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Sends [`LlmCall`]s to a provider. Shared by `Arc` across workers.
pub struct LlmInvoker {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    system_prompt: String,
    structured_output: StructuredOutputMode,
    tool_bind: ToolBindMode,
    retry: RetryPolicy,
    runtime: Handle,
}

impl LlmInvoker {
    /// Create an invoker from configuration. `runtime` drives
    /// [`call_blocking`](Self::call_blocking).
    pub fn new(provider: Arc<dyn Provider>, config: &AppConfig, runtime: Handle) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            structured_output: config.llm.structured_output(),
            tool_bind: config.llm.tool_bind(),
            retry: RetryPolicy::default(),
            runtime,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Send a call and interpret the response.
    pub async fn call(&self, call: LlmCall) -> Result<LlmOutput, ProviderError> {
        let request = self.build_request(&call);

        debug!(
            provider = %self.provider.name(),
            model = %self.model,
            structured = call.output_schema.is_some(),
            tools = request.tools.len(),
            "Invoking LLM"
        );

        let response = with_retry(&self.retry, "llm_call", || {
            self.provider.complete(request.clone())
        })
        .await?;

        self.interpret(&call, response)
    }

    /// Blocking variant for worker threads.
    ///
    /// Must not be called from within an async context (it would block the
    /// scheduler thread); use [`call`](Self::call) there.
    pub fn call_blocking(&self, call: LlmCall) -> Result<LlmOutput, ProviderError> {
        self.runtime.block_on(self.call(call))
    }

    fn build_request(&self, call: &LlmCall) -> ProviderRequest {
        let system_prompt = call
            .system_prompt
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.system_prompt.clone());

        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(system_prompt), Message::user(call.prompt.clone())],
        )
        .with_temperature(self.temperature);

        if let Some(schema) = &call.output_schema {
            match self.structured_output {
                StructuredOutputMode::FunctionCalling => {
                    request.tools = vec![ToolDefinition {
                        name: schema.name.clone(),
                        description: schema.description.clone().unwrap_or_default(),
                        parameters: schema.schema.clone(),
                    }];
                    request.tool_choice = Some(ToolChoice::Function(schema.name.clone()));
                }
                StructuredOutputMode::JsonSchema => {
                    request.response_format = Some(ResponseFormat::JsonSchema {
                        name: schema.name.clone(),
                        schema: schema.schema.clone(),
                        strict: false,
                    });
                }
                StructuredOutputMode::None => {}
            }
        } else if !call.tools.is_empty() && self.tool_bind == ToolBindMode::Bind {
            request.tools = call.tools.clone();
        }

        request
    }

    fn interpret(
        &self,
        call: &LlmCall,
        response: ProviderResponse,
    ) -> Result<LlmOutput, ProviderError> {
        let Some(schema) = &call.output_schema else {
            return Ok(LlmOutput::Message(response));
        };

        match self.structured_output {
            StructuredOutputMode::FunctionCalling => {
                let tool_call = response
                    .message
                    .tool_calls
                    .iter()
                    .find(|tc| tc.name == schema.name)
                    .ok_or_else(|| ProviderError::ApiError {
                        status_code: 200,
                        message: format!("model did not call '{}'", schema.name),
                    })?;
                let value = tool_call
                    .parse_arguments()
                    .map_err(|e| structured_parse_error(&schema.name, e))?;
                Ok(LlmOutput::Structured(value))
            }
            StructuredOutputMode::JsonSchema => {
                let value = serde_json::from_str(&response.message.content)
                    .map_err(|e| structured_parse_error(&schema.name, e))?;
                Ok(LlmOutput::Structured(value))
            }
            StructuredOutputMode::None => Ok(LlmOutput::Message(response)),
        }
    }
}

fn structured_parse_error(name: &str, e: serde_json::Error) -> ProviderError {
    ProviderError::ApiError {
        status_code: 200,
        message: format!("invalid structured output for '{name}': {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dexter_core::MessageToolCall;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays a fixed script of results and records every request.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
        call_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                call_times: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            self.call_times.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text_response("")))
        }
    }

    fn text_response(content: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model: "gpt-4.1".into(),
        }
    }

    fn tool_call_response(name: &str, arguments: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant("").with_tool_calls(vec![MessageToolCall {
                id: "call_1".into(),
                name: name.into(),
                arguments: arguments.into(),
            }]),
            usage: None,
            model: "gpt-4.1".into(),
        }
    }

    fn config_with_method(method: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.structured_output_method = method.into();
        config
    }

    fn plan_schema() -> OutputSchema {
        OutputSchema::new(
            "Plan",
            json!({"type": "object", "properties": {"tasks": {"type": "array"}}}),
        )
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition {
            name: "search".into(),
            description: "Search filings".into(),
            parameters: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn plain_call_uses_default_system_prompt() {
        let provider = ScriptedProvider::new(vec![Ok(text_response("hello"))]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        let output = invoker.call(LlmCall::new("hi")).await.unwrap();
        assert_eq!(output.into_text(), "hello");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "gpt-4.1");
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(request.messages[1].content, "hi");
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn explicit_system_prompt_wins() {
        let provider = ScriptedProvider::new(vec![]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        invoker
            .call(LlmCall::new("q").with_system_prompt("Be terse."))
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].messages[0].content, "Be terse.");
    }

    #[tokio::test]
    async fn function_calling_forces_the_schema_tool() {
        let provider =
            ScriptedProvider::new(vec![Ok(tool_call_response("Plan", r#"{"tasks":["a"]}"#))]);
        let invoker = LlmInvoker::new(
            provider.clone(),
            &config_with_method("function_calling"),
            Handle::current(),
        );

        let output = invoker
            .call(LlmCall::new("plan").with_output_schema(plan_schema()))
            .await
            .unwrap();
        assert_eq!(output.into_structured(), Some(json!({"tasks": ["a"]})));

        let request = &provider.requests()[0];
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "Plan");
        assert_eq!(request.tool_choice, Some(ToolChoice::Function("Plan".into())));
        assert!(request.response_format.is_none());
    }

    #[tokio::test]
    async fn json_schema_sets_response_format() {
        let provider = ScriptedProvider::new(vec![Ok(text_response(r#"{"tasks":[]}"#))]);
        let invoker = LlmInvoker::new(
            provider.clone(),
            &config_with_method("json_schema"),
            Handle::current(),
        );

        let output = invoker
            .call(LlmCall::new("plan").with_output_schema(plan_schema()))
            .await
            .unwrap();
        assert_eq!(output.into_structured(), Some(json!({"tasks": []})));

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert!(request.tool_choice.is_none());
        assert!(matches!(
            request.response_format,
            Some(ResponseFormat::JsonSchema { ref name, .. }) if name == "Plan"
        ));
    }

    #[tokio::test]
    async fn mode_none_applies_no_binding() {
        let provider = ScriptedProvider::new(vec![Ok(text_response("free text"))]);
        let invoker =
            LlmInvoker::new(provider.clone(), &config_with_method(" NONE "), Handle::current());

        let output = invoker
            .call(LlmCall::new("plan").with_output_schema(plan_schema()))
            .await
            .unwrap();
        assert_eq!(output.as_message().unwrap().message.content, "free text");

        let request = &provider.requests()[0];
        assert!(request.tools.is_empty());
        assert!(request.tool_choice.is_none());
        assert!(request.response_format.is_none());
    }

    #[tokio::test]
    async fn unrecognized_mode_behaves_as_function_calling() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_response("Plan", "{}"))]);
        let invoker =
            LlmInvoker::new(provider.clone(), &config_with_method("xml"), Handle::current());

        invoker
            .call(LlmCall::new("plan").with_output_schema(plan_schema()))
            .await
            .unwrap();
        let request = &provider.requests()[0];
        assert_eq!(request.tool_choice, Some(ToolChoice::Function("Plan".into())));
    }

    #[tokio::test]
    async fn missing_function_call_is_an_error() {
        let provider = ScriptedProvider::new(vec![Ok(text_response("I refuse"))]);
        let invoker = LlmInvoker::new(provider, &AppConfig::default(), Handle::current());

        let err = invoker
            .call(LlmCall::new("plan").with_output_schema(plan_schema()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 200, .. }));
    }

    #[tokio::test]
    async fn tools_are_bound_only_in_bind_mode() {
        let provider = ScriptedProvider::new(vec![]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());
        invoker
            .call(LlmCall::new("q").with_tools(vec![search_tool()]))
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].tools.len(), 1);
        assert!(provider.requests()[0].tool_choice.is_none());

        let mut config = AppConfig::default();
        config.llm.tool_bind = "off".into();
        let provider = ScriptedProvider::new(vec![]);
        let invoker = LlmInvoker::new(provider.clone(), &config, Handle::current());
        invoker
            .call(LlmCall::new("q").with_tools(vec![search_tool()]))
            .await
            .unwrap();
        assert!(provider.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn schema_takes_precedence_over_tools() {
        let provider = ScriptedProvider::new(vec![Ok(tool_call_response("Plan", "{}"))]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        invoker
            .call(
                LlmCall::new("q")
                    .with_output_schema(plan_schema())
                    .with_tools(vec![search_tool()]),
            )
            .await
            .unwrap();
        let request = &provider.requests()[0];
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "Plan");
    }

    #[tokio::test(start_paused = true)]
    async fn three_transient_failures_use_backoff_then_fail() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Network("connection refused".into())),
            Err(ProviderError::Network("connection refused".into())),
            Err(ProviderError::Network("still refused".into())),
        ]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        let err = invoker.call(LlmCall::new("q")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(ref m) if m == "still refused"));

        let times = provider.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(500) && first_gap < Duration::from_millis(600));
        assert!(
            second_gap >= Duration::from_millis(1000) && second_gap < Duration::from_millis(1100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_transient_failures_then_success() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Timeout("slow".into())),
            Err(ProviderError::Network("reset".into())),
            Ok(text_response("recovered")),
        ]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        let output = invoker.call(LlmCall::new("q")).await.unwrap();
        assert_eq!(output.into_text(), "recovered");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        })]);
        let invoker = LlmInvoker::new(provider.clone(), &AppConfig::default(), Handle::current());

        let err = invoker.call(LlmCall::new("q")).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_blocking_from_worker_thread() {
        let provider = ScriptedProvider::new(vec![Ok(text_response("from worker"))]);
        let invoker = Arc::new(LlmInvoker::new(
            provider,
            &AppConfig::default(),
            Handle::current(),
        ));

        let worker = invoker.clone();
        let output = tokio::task::spawn_blocking(move || worker.call_blocking(LlmCall::new("q")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.into_text(), "from worker");
    }
}
