//! Configuration loading and validation for Dexter.
//!
//! Loads configuration from `~/.dexter/config.toml` (optional) and then
//! applies environment variable overrides. The result is read once at
//! startup and shared read-only afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.dexter/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Alternate OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Replaces the built-in default system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Structured-output and tool-binding selectors
    #[serde(default)]
    pub llm: LlmConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-run step limits used when a request leaves them unset
    #[serde(default)]
    pub runs: RunConfig,
}

fn default_model() -> String {
    "gpt-4.1".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("llm", &self.llm)
            .field("gateway", &self.gateway)
            .field("runs", &self.runs)
            .finish()
    }
}

/// Mode selectors for the invocation layer, kept as the raw configured text.
///
/// Use [`LlmConfig::structured_output`] and [`LlmConfig::tool_bind`] to get
/// the effective modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_structured_output_method")]
    pub structured_output_method: String,

    #[serde(default = "default_tool_bind")]
    pub tool_bind: String,
}

fn default_structured_output_method() -> String {
    "function_calling".into()
}
fn default_tool_bind() -> String {
    "bind".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            structured_output_method: default_structured_output_method(),
            tool_bind: default_tool_bind(),
        }
    }
}

impl LlmConfig {
    /// Effective structured-output mode; unknown values act as `function_calling`.
    pub fn structured_output(&self) -> StructuredOutputMode {
        StructuredOutputMode::from_setting(&self.structured_output_method)
    }

    /// Effective tool-binding mode; anything but `bind` disables binding.
    pub fn tool_bind(&self) -> ToolBindMode {
        ToolBindMode::from_setting(&self.tool_bind)
    }
}

/// How a requested output schema is negotiated with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructuredOutputMode {
    /// Send the schema as a forced function call
    #[default]
    FunctionCalling,
    /// Send the schema as a JSON-schema response format
    JsonSchema,
    /// Ignore the schema
    None,
}

impl StructuredOutputMode {
    /// Strict parse of a selector value (trimmed, case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "function_calling" => Some(Self::FunctionCalling),
            "json_schema" => Some(Self::JsonSchema),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Lenient parse: unrecognized values fall back to the default.
    pub fn from_setting(value: &str) -> Self {
        Self::parse(value).unwrap_or_default()
    }
}

/// Whether tool definitions are attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolBindMode {
    #[default]
    Bind,
    None,
}

impl ToolBindMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bind" => Some(Self::Bind),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn from_setting(value: &str) -> Self {
        match Self::parse(value) {
            Some(Self::Bind) => Self::Bind,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_max_steps_per_task")]
    pub max_steps_per_task: u32,
}

fn default_max_steps() -> u32 {
    20
}
fn default_max_steps_per_task() -> u32 {
    5
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_steps_per_task: default_max_steps_per_task(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.dexter/config.toml),
    /// then apply environment overrides:
    ///
    /// - `OPENAI_API_KEY`, `OPENAI_API_BASE`
    /// - `DEXTER_LLM_MODEL`
    /// - `DEXTER_LLM_STRUCTURED_OUTPUT_METHOD`, `DEXTER_LLM_TOOL_BIND`
    /// - `DEXTER_HOST`, `DEXTER_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        config.warn_unrecognized_modes();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            self.api_base = Some(base);
        }
        if let Some(model) = lookup("DEXTER_LLM_MODEL") {
            self.model = model;
        }
        if let Some(method) = lookup("DEXTER_LLM_STRUCTURED_OUTPUT_METHOD") {
            self.llm.structured_output_method = method;
        }
        if let Some(bind) = lookup("DEXTER_LLM_TOOL_BIND") {
            self.llm.tool_bind = bind;
        }
        if let Some(host) = lookup("DEXTER_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = lookup("DEXTER_PORT") {
            self.gateway.port = port.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("DEXTER_PORT is not a valid port: {port}"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".dexter")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        Ok(())
    }

    /// Unknown selector values are accepted and fall back; say so once.
    fn warn_unrecognized_modes(&self) {
        if StructuredOutputMode::parse(&self.llm.structured_output_method).is_none() {
            tracing::warn!(
                value = %self.llm.structured_output_method,
                "Unrecognized structured output method, using function_calling"
            );
        }
        if ToolBindMode::parse(&self.llm.tool_bind).is_none() {
            tracing::warn!(
                value = %self.llm.tool_bind,
                "Unrecognized tool bind mode, tools will not be bound"
            );
        }
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: default_model(),
            temperature: 0.0,
            system_prompt: None,
            llm: LlmConfig::default(),
            gateway: GatewayConfig::default(),
            runs: RunConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
