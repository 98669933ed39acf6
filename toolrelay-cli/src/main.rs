use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{CallerArgs, run_ask, run_chat, run_providers, run_tools};

#[derive(Parser, Debug)]
#[command(name = "toolrelay", version = "0.1.0")]
#[command(about = "toolrelay - route questions through tool providers")]
struct Cli {
    /// TOML configuration file; TOOLRELAY_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer one question and print the outcome as JSON
    Ask {
        /// The question to answer
        query: String,
        #[command(flatten)]
        caller: CallerArgs,
        /// Override the configured planning round budget
        #[arg(long)]
        max_rounds: Option<usize>,
    },
    /// Read questions from stdin, one per line, within a single session
    Chat {
        #[command(flatten)]
        caller: CallerArgs,
        /// Session identifier
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// List the tools visible to a caller
    Tools {
        #[command(flatten)]
        caller: CallerArgs,
    },
    /// Run provider discovery and print the report
    Providers,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays machine-readable.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Ask {
            query,
            caller,
            max_rounds,
        } => run_ask(config, &query, &caller, max_rounds).await,
        Commands::Chat { caller, session } => run_chat(config, &caller, &session).await,
        Commands::Tools { caller } => run_tools(config, &caller).await,
        Commands::Providers => run_providers(config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, code = e.code(), "Command failed");
        std::process::exit(1);
    }
}
