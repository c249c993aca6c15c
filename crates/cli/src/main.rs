//! Stepwise CLI, the main entry point.
//!
//! Commands:
//! - `run`      Run the agent headless on one task, streaming JSON Lines
//! - `init`     Create the `.stepwise/` agent home of a project
//! - `config`   Show the effective configuration
//! - `pricing`  List the model pricing table
//!
//! Diagnostics go to stderr; stdout carries only events.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

use commands::ConfigArgs;
use commands::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise: a headless shell agent driven by a language model",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a task
    Run(RunArgs),

    /// Initialize the agent home
    Init {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Show the effective configuration (secrets redacted)
    Config(ConfigArgs),

    /// List model pricing
    Pricing(ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing on stderr
    let filter = if cli.verbose { "debug" } else { "info" };
    let logs = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match cli.command {
        Commands::Run(args) => return commands::run::run(args).await,
        Commands::Init { workdir } => commands::init::run(&workdir).await?,
        Commands::Config(args) => commands::config_cmd::show(args).await?,
        Commands::Pricing(args) => commands::pricing::list(args).await?,
    }

    Ok(ExitCode::SUCCESS)
}
