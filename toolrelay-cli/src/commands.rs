//! Subcommand implementations.

use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolrelay_agent::{
    AgentError, ConfigError, OpenAiCompatibleEngine, Orchestrator, OrchestratorConfig,
    OrchestratorConfigBuilder,
};
use toolrelay_core::AccessContext;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CONFIG_ERROR",
            CliError::Agent(e) => e.error_code(),
            CliError::Io(_) => "IO_ERROR",
            CliError::Output(_) => "OUTPUT_ERROR",
        }
    }
}

/// Who is asking.
#[derive(Args, Debug, Clone)]
pub struct CallerArgs {
    /// Caller identifier
    #[arg(long, default_value = "cli-user")]
    pub user: String,
    /// Caller roles, comma separated
    #[arg(long, value_delimiter = ',')]
    pub roles: Vec<String>,
    /// Caller email, used for record-level filtering by providers
    #[arg(long)]
    pub email: Option<String>,
    /// Caller tenant
    #[arg(long)]
    pub tenant: Option<String>,
}

impl CallerArgs {
    pub fn access_context(&self) -> AccessContext {
        let mut access = AccessContext::new(&self.user).with_roles(
            self.roles
                .iter()
                .map(|r| r.trim())
                .filter(|r| !r.is_empty()),
        );
        if let Some(email) = &self.email {
            access = access.with_email(email);
        }
        if let Some(tenant) = &self.tenant {
            access = access.with_tenant(tenant);
        }
        access
    }
}

pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig, ConfigError> {
    let builder = match path {
        Some(path) => OrchestratorConfigBuilder::from_toml_file(path)?.merge_env()?,
        None => OrchestratorConfigBuilder::from_env()?,
    };
    builder.build()
}

fn build_orchestrator(path: Option<&Path>) -> Result<Orchestrator, CliError> {
    let config = load_config(path)?;
    let engine = OpenAiCompatibleEngine::new(config.engine.clone())?;
    tracing::info!(
        providers = config.providers.len(),
        model = %engine.model(),
        execution_mode = %config.execution_mode,
        "Orchestrator configured"
    );
    Ok(Orchestrator::from_config_with_http(&config, Arc::new(engine))?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_ask(
    config: Option<&Path>,
    query: &str,
    caller: &CallerArgs,
    max_rounds: Option<usize>,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config)?;
    let outcome = orchestrator
        .process(query, &caller.access_context(), &[], max_rounds)
        .await;
    print_json(&outcome)
}

pub async fn run_chat(
    config: Option<&Path>,
    caller: &CallerArgs,
    session: &str,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config)?;
    let access = caller.access_context();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let outcome = orchestrator
            .process_in_session(session, query, &access, None)
            .await?;
        println!("{}", outcome.response);
    }
    Ok(())
}

pub async fn run_tools(config: Option<&Path>, caller: &CallerArgs) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config)?;
    let tools = orchestrator.visible_tools(&caller.access_context()).await?;
    print_json(&tools)
}

pub async fn run_providers(config: Option<&Path>) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config)?;
    let report = orchestrator.refresh().await?;
    print_json(&report)
}
