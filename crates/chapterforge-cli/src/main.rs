//! chapterforge CLI (spec §9.1): a thin `clap`-derived entry point over the
//! in-process `Orchestrator`, grounded on `examples/original_source/main.py`'s
//! "read a source file, print the final report path" surface and the
//! teacher's own `crates/cli` for the subcommand/output-format shape.

mod config;
mod output;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use output::OutputFormat;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "chapterforge")]
#[command(about = "Content derivation pipeline CLI")]
#[command(version)]
struct Cli {
    /// Optional TOML config file; defaults to CHAPTERFORGE_CONFIG or built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"], global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new workflow from a source document.
    Run {
        /// Path to the source document (plain text, markdown-structured by headings).
        source_file: PathBuf,

        /// Execution mode.
        #[arg(long, default_value = "async", value_parser = ["sync", "async", "dry-run"])]
        mode: String,
    },
    /// Resume a suspended or interrupted workflow.
    Resume { execution_id: Uuid },
    /// Cancel a running workflow.
    Cancel { execution_id: Uuid },
    /// Print the current status of a workflow execution.
    Status { execution_id: Uuid },
}

/// Exit codes (spec §6): 0 success; non-zero for input-missing,
/// configuration-invalid, workflow-failed, workflow-timeout.
#[repr(i32)]
pub(crate) enum ExitCode {
    Success = 0,
    InputMissing = 2,
    ConfigInvalid = 3,
    WorkflowFailed = 4,
    WorkflowTimeout = 5,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output_format = OutputFormat::from_str(&cli.output);

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(ExitCode::ConfigInvalid as i32);
        }
    };

    init_tracing(config.log_level());

    let code = match cli.command {
        Commands::Run { source_file, mode } => run::run(&config, output_format, &source_file, &mode).await,
        Commands::Resume { execution_id } => run::resume(&config, output_format, execution_id).await,
        Commands::Cancel { execution_id } => run::cancel(&config, output_format, execution_id).await,
        Commands::Status { execution_id } => run::status(&config, output_format, execution_id).await,
    };

    match code {
        Ok(code) => std::process::exit(code as i32),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(ExitCode::WorkflowFailed as i32);
        }
    }
}

fn init_tracing(level: config::LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
