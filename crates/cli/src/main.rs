//! Dexter CLI, the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP run server
//! - `ask`     Run one query in-process and print its events as JSON lines
//! - `status`  Show the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dexter",
    about = "Dexter: long-running research runs streamed as Server-Sent Events",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP run server
    Serve {
        /// Override the listen host
        #[arg(long)]
        host: Option<String>,

        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single query and print every event as a JSON line
    Ask {
        /// The question to research
        query: String,

        /// Total step budget for the run
        #[arg(long)]
        max_steps: Option<u32>,

        /// Step budget per planned task
        #[arg(long)]
        max_steps_per_task: Option<u32>,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries `ask` output.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(host, port).await?,
        Commands::Ask {
            query,
            max_steps,
            max_steps_per_task,
        } => commands::ask::run(query, max_steps, max_steps_per_task).await?,
        Commands::Status => commands::status::run()?,
    }

    Ok(())
}
