//! Taskwright CLI - Main Entry Point
//!
//! Runs browser test specs against the task manager and manages the
//! fixtures they leave in its store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskwright_cli::commands::{self, fixtures, list, run};
use taskwright_cli::output::{self, OutputFormat};
use tracing_subscriber::EnvFilter;

/// Taskwright - browser UI test harness for Task Manager Plus
#[derive(Parser)]
#[command(name = "taskwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = taskwright_common::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test specs
    Run(run::RunArgs),

    /// List test specs
    List(list::ListArgs),

    /// Inspect or purge test fixtures
    #[command(subcommand)]
    Fixtures(fixtures::FixturesCommands),

    /// Show version information
    Version,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run(args) => {
            let config = commands::load_config(&cli.config)?;
            run::execute(args, config, cli.format).await
        }
        Commands::List(args) => list::execute(args, cli.format),
        Commands::Fixtures(cmd) => {
            let config = commands::load_config(&cli.config)?;
            fixtures::execute(cmd, &config, cli.format)
        }
        Commands::Version => {
            println!("Taskwright v{}", taskwright_common::VERSION);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
