mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crucible-cli")]
#[command(about = "Crucible CLI - Run untrusted code in sandboxed containers", long_about = None)]
struct Cli {
    /// Engine config file (defaults to config/crucible.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reuse the per-language persistent container instead of creating an
    /// ephemeral one per run
    #[arg(long, global = true)]
    persistent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a source file once and print its output
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Language (inferred from the file extension if omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// File whose contents are fed to the program on stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,
    },

    /// Run a source file against a JSON array of test cases
    Judge {
        /// Source file to judge
        file: PathBuf,

        /// JSON file with [{"input", "expected_output", "hidden"?}, ...]
        #[arg(short, long)]
        cases: PathBuf,

        /// Language (inferred from the file extension if omitted)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// List supported languages and their images
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            language,
            stdin_file,
        } => {
            commands::run(
                &file,
                language.as_deref(),
                stdin_file.as_deref(),
                cli.config.as_deref(),
                cli.persistent,
            )
            .await?;
        }
        Commands::Judge {
            file,
            cases,
            language,
        } => {
            commands::judge(
                &file,
                &cases,
                language.as_deref(),
                cli.config.as_deref(),
                cli.persistent,
            )
            .await?;
        }
        Commands::Languages => {
            commands::languages(cli.config.as_deref())?;
        }
    }

    Ok(())
}
