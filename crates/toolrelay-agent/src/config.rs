//! # Orchestrator Configuration
//!
//! Configuration is assembled with [`OrchestratorConfigBuilder`], either
//! programmatically, from a TOML file, or from environment variables.
//!
//! ## Environment Variables
//!
//! ### Providers
//! - `TOOLRELAY_PROVIDERS` - JSON object of provider id to MCP endpoint URL,
//!   e.g. `{"crm": "http://localhost:8001/mcp"}`. Providers are discovered in
//!   id order.
//! - `TOOLRELAY_PROVIDER_TIMEOUT_SECS` - Per-request provider timeout (default: 10)
//! - `TOOLRELAY_COLLISION_POLICY` - `last_wins` (default), `first_wins` or `reject`
//!
//! ### Planning
//! - `TOOLRELAY_MAX_ROUNDS` - Planning round budget per request (default: 30)
//! - `TOOLRELAY_MAX_HEAL_ATTEMPTS` - Query attempts for self-healing tools (default: 3)
//! - `TOOLRELAY_EXECUTION_MODE` - `sequential` (default) or `concurrent:<n>`
//! - `TOOLRELAY_SYSTEM_PROMPT` - Inline planner system prompt
//! - `TOOLRELAY_SYSTEM_PROMPT_PATH` - File holding the planner system prompt
//! - `TOOLRELAY_ACCESS_POLICY_PATH` - TOML access policy file
//!
//! ### Reasoning Engine
//! - `TOOLRELAY_ENGINE_URL` - OpenAI-compatible base URL (default: `https://api.openai.com/v1`)
//! - `TOOLRELAY_ENGINE_MODEL` - Model or deployment name (default: `gpt-4o-mini`)
//! - `TOOLRELAY_ENGINE_API_KEY` - Bearer token for the engine
//! - `TOOLRELAY_ENGINE_TEMPERATURE` - Sampling temperature 0.0-2.0 (default: 0.1)
//! - `TOOLRELAY_ENGINE_MAX_TOKENS` - Completion token cap
//! - `TOOLRELAY_ENGINE_TIMEOUT_SECS` - Engine request timeout (default: 60)
//! - `TOOLRELAY_ENGINE_RETRY_ATTEMPTS` - Attempts on transient engine errors (default: 3)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::{env, fmt};
use toolrelay_core::{CollisionPolicy, ProviderDescriptor};

pub const DEFAULT_MAX_ROUNDS: usize = 30;
pub const DEFAULT_MAX_HEAL_ATTEMPTS: usize = 3;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Invalid configuration file '{path}': {message}")]
    InvalidFile { path: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// How the tool calls of one planning round are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionMode {
    /// One call at a time, in request order
    #[default]
    Sequential,
    /// Up to `max_in_flight` calls at once; records keep request order
    Concurrent { max_in_flight: usize },
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "concurrent" => Ok(ExecutionMode::Concurrent { max_in_flight: 4 }),
            other => match other.strip_prefix("concurrent:") {
                Some(n) => n
                    .parse::<usize>()
                    .map(|max_in_flight| ExecutionMode::Concurrent { max_in_flight })
                    .map_err(|e| format!("invalid concurrency '{n}': {e}")),
                None => Err(format!(
                    "unknown execution mode '{other}', expected sequential or concurrent:<n>"
                )),
            },
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Concurrent { max_in_flight } => write!(f, "concurrent:{max_in_flight}"),
        }
    }
}

/// Connection settings for the OpenAI-compatible reasoning engine.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: None,
            timeout_secs: 60,
            retry_attempts: 3,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

/// Validated orchestrator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub providers: Vec<ProviderDescriptor>,
    pub max_rounds: usize,
    pub max_heal_attempts: usize,
    pub execution_mode: ExecutionMode,
    pub collision_policy: CollisionPolicy,
    pub provider_timeout_secs: u64,
    pub engine: EngineConfig,
    pub system_prompt: Option<String>,
    pub system_prompt_path: Option<PathBuf>,
    pub access_policy_path: Option<PathBuf>,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }
}

/// On-disk shape of the TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    providers: BTreeMap<String, String>,
    max_rounds: Option<usize>,
    max_heal_attempts: Option<usize>,
    execution_mode: Option<String>,
    collision_policy: Option<CollisionPolicy>,
    provider_timeout_secs: Option<u64>,
    engine: Option<EngineConfig>,
    system_prompt: Option<String>,
    system_prompt_path: Option<PathBuf>,
    access_policy_path: Option<PathBuf>,
}

/// Builder for `OrchestratorConfig` with environment variable support
#[derive(Debug, Clone)]
pub struct OrchestratorConfigBuilder {
    providers: Vec<ProviderDescriptor>,
    max_rounds: usize,
    max_heal_attempts: usize,
    execution_mode: ExecutionMode,
    collision_policy: CollisionPolicy,
    provider_timeout_secs: u64,
    engine: EngineConfig,
    system_prompt: Option<String>,
    system_prompt_path: Option<PathBuf>,
    access_policy_path: Option<PathBuf>,
}

impl Default for OrchestratorConfigBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_heal_attempts: DEFAULT_MAX_HEAL_ATTEMPTS,
            execution_mode: ExecutionMode::default(),
            collision_policy: CollisionPolicy::default(),
            provider_timeout_secs: 10,
            engine: EngineConfig::default(),
            system_prompt: None,
            system_prompt_path: None,
            access_policy_path: None,
        }
    }
}

impl OrchestratorConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Apply environment variables on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        // Providers
        if let Some(raw) = get_env_string("TOOLRELAY_PROVIDERS") {
            let endpoints: BTreeMap<String, String> =
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidEnvVar {
                    key: "TOOLRELAY_PROVIDERS".to_string(),
                    message: format!("expected a JSON object of id to URL: {e}"),
                })?;
            self = self.providers(
                endpoints
                    .into_iter()
                    .map(|(id, url)| ProviderDescriptor::http(id, url))
                    .collect(),
            );
        }
        if let Some(timeout) = get_env_u64("TOOLRELAY_PROVIDER_TIMEOUT_SECS")? {
            self = self.provider_timeout_secs(timeout);
        }
        if let Some(policy) = get_env_parsed::<CollisionPolicy>("TOOLRELAY_COLLISION_POLICY")? {
            self = self.collision_policy(policy);
        }

        // Planning
        if let Some(rounds) = get_env_usize("TOOLRELAY_MAX_ROUNDS")? {
            self = self.max_rounds(rounds);
        }
        if let Some(attempts) = get_env_usize("TOOLRELAY_MAX_HEAL_ATTEMPTS")? {
            self = self.max_heal_attempts(attempts);
        }
        if let Some(mode) = get_env_parsed::<ExecutionMode>("TOOLRELAY_EXECUTION_MODE")? {
            self = self.execution_mode(mode);
        }
        if let Some(prompt) = get_env_string("TOOLRELAY_SYSTEM_PROMPT") {
            self = self.system_prompt(prompt);
        }
        if let Some(path) = get_env_string("TOOLRELAY_SYSTEM_PROMPT_PATH") {
            self = self.system_prompt_path(PathBuf::from(path));
        }
        if let Some(path) = get_env_string("TOOLRELAY_ACCESS_POLICY_PATH") {
            self = self.access_policy_path(PathBuf::from(path));
        }

        // Reasoning Engine
        let mut engine = self.engine.clone();
        if let Some(url) = get_env_string("TOOLRELAY_ENGINE_URL") {
            engine.base_url = url;
        }
        if let Some(model) = get_env_string("TOOLRELAY_ENGINE_MODEL") {
            engine.model = model;
        }
        if let Some(key) = get_env_string("TOOLRELAY_ENGINE_API_KEY") {
            engine.api_key = Some(key);
        }
        if let Some(temperature) = get_env_parsed::<f32>("TOOLRELAY_ENGINE_TEMPERATURE")? {
            engine.temperature = temperature;
        }
        if let Some(max_tokens) = get_env_parsed::<u32>("TOOLRELAY_ENGINE_MAX_TOKENS")? {
            engine.max_tokens = Some(max_tokens);
        }
        if let Some(timeout) = get_env_u64("TOOLRELAY_ENGINE_TIMEOUT_SECS")? {
            engine.timeout_secs = timeout;
        }
        if let Some(attempts) = get_env_parsed::<u32>("TOOLRELAY_ENGINE_RETRY_ATTEMPTS")? {
            engine.retry_attempts = attempts;
        }
        self = self.engine(engine);

        Ok(self)
    }

    /// Load configuration from a TOML document.
    ///
    /// ```toml
    /// max_rounds = 10
    /// execution_mode = "concurrent:4"
    ///
    /// [providers]
    /// crm = "http://localhost:8001/mcp"
    ///
    /// [engine]
    /// model = "gpt-4o"
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(source).map_err(|e| ConfigError::InvalidFile {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;

        let mut builder = Self::default().providers(
            file.providers
                .into_iter()
                .map(|(id, url)| ProviderDescriptor::http(id, url))
                .collect(),
        );
        if let Some(rounds) = file.max_rounds {
            builder = builder.max_rounds(rounds);
        }
        if let Some(attempts) = file.max_heal_attempts {
            builder = builder.max_heal_attempts(attempts);
        }
        if let Some(mode) = file.execution_mode {
            let mode = mode
                .parse::<ExecutionMode>()
                .map_err(ConfigError::ValidationError)?;
            builder = builder.execution_mode(mode);
        }
        if let Some(policy) = file.collision_policy {
            builder = builder.collision_policy(policy);
        }
        if let Some(timeout) = file.provider_timeout_secs {
            builder = builder.provider_timeout_secs(timeout);
        }
        if let Some(engine) = file.engine {
            builder = builder.engine(engine);
        }
        builder.system_prompt = file.system_prompt;
        builder.system_prompt_path = file.system_prompt_path;
        builder.access_policy_path = file.access_policy_path;

        Ok(builder)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source).map_err(|e| match e {
            ConfigError::InvalidFile { message, .. } => ConfigError::InvalidFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Replace the provider list
    #[must_use]
    pub fn providers(mut self, providers: Vec<ProviderDescriptor>) -> Self {
        self.providers = providers;
        self
    }

    /// Append one provider
    #[must_use]
    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the planning round budget
    #[must_use]
    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Set the attempt budget for self-healing queries
    #[must_use]
    pub fn max_heal_attempts(mut self, attempts: usize) -> Self {
        self.max_heal_attempts = attempts;
        self
    }

    /// Set the per-round execution mode
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the tool-name collision policy
    #[must_use]
    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Set the provider request timeout in seconds
    #[must_use]
    pub fn provider_timeout_secs(mut self, secs: u64) -> Self {
        self.provider_timeout_secs = secs;
        self
    }

    /// Set reasoning engine settings
    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set an inline system prompt
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the system prompt file
    #[must_use]
    pub fn system_prompt_path(mut self, path: PathBuf) -> Self {
        self.system_prompt_path = Some(path);
        self
    }

    /// Set the access policy file
    #[must_use]
    pub fn access_policy_path(mut self, path: PathBuf) -> Self {
        self.access_policy_path = Some(path);
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.validate()?;

        Ok(OrchestratorConfig {
            providers: self.providers,
            max_rounds: self.max_rounds,
            max_heal_attempts: self.max_heal_attempts,
            execution_mode: self.execution_mode,
            collision_policy: self.collision_policy,
            provider_timeout_secs: self.provider_timeout_secs,
            engine: self.engine,
            system_prompt: self.system_prompt,
            system_prompt_path: self.system_prompt_path,
            access_policy_path: self.access_policy_path,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "max_rounds must be greater than 0".to_string(),
            ));
        }
        if self.max_heal_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_heal_attempts must be greater than 0".to_string(),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let ExecutionMode::Concurrent { max_in_flight: 0 } = self.execution_mode {
            return Err(ConfigError::ValidationError(
                "concurrent execution needs max_in_flight greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.engine.temperature) {
            return Err(ConfigError::ValidationError(
                "engine temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.engine.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine base_url must not be empty".to_string(),
            ));
        }
        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "engine timeout_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
