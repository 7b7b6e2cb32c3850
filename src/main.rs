mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use assistant_backend::config::AssistantConfig;
use assistant_backend::runtime::AssistantRuntime;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Personal assistant that routes requests to skills through a tool-calling model.
#[derive(Debug, Parser)]
#[command(name = "assistant", version, about)]
struct Cli {
    /// Chat in the terminal instead of starting the web front-end
    #[arg(long)]
    cli: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,assistant=debug,assistant_backend=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match AssistantRuntime::bootstrap(AssistantConfig::load()) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error initializing the assistant: {:#}", e);
            eprintln!(
                "Set GROQ_API_KEY (and optionally ASANA_ACCESS_TOKEN + ASANA_WORKPLACE_ID) \
                 in your environment or a .env file."
            );
            return ExitCode::FAILURE;
        }
    };

    match run(args, runtime).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli, runtime: AssistantRuntime) -> Result<()> {
    if args.cli {
        cli::run(runtime).await.context("CLI session failed")
    } else {
        tracing::info!(
            "Starting web chat (set ASSISTANT_TOKEN + optional ASSISTANT_BIND; auth mode via ASSISTANT_AUTH_MODE)"
        );
        assistant_backend::server::serve(runtime).await
    }
}
