//! bundle-patcher - Patches OLM bundle manifests from build environment variables
//!
//! Inputs arrive through the environment (`TARGET_CSV_FILE`, `X_VERSION`,
//! `OPERATOR_IMAGE`, ...); the target manifest is rewritten in place.

use bundle_patcher::commands::{self, OutputFormat, RunOptions};
use bundle_patcher::config::{self, ProcessEnv};
use bundle_patcher::models::NoMatchPolicy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bundle-patcher")]
#[command(author, version, about = "Patch OLM bundle manifests from build environment variables")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (TOML) overriding operator name, channel, branding
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fail when a locator matches nothing instead of skipping it
    #[arg(long, global = true)]
    strict: bool,

    /// What to do when a locator matches nothing: ignore, fail
    #[arg(long, global = true, value_name = "POLICY", conflicts_with = "strict")]
    on_missing: Option<NoMatchPolicy>,

    /// Print the patched manifest instead of writing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the patch report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch the ClusterServiceVersion at $TARGET_CSV_FILE
    Csv,

    /// Patch the bundle annotations at $TARGET_METADATA_ANNOTATIONS_FILE
    Metadata,
}

/// Exit code for command-line usage errors; 2 is kept for unreadable input
const EXIT_USAGE: u8 = 1;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version also arrive here and go to stdout
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = commands::exit_code(&err);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = config::load_settings(cli.config.as_deref())?;
    let options = RunOptions {
        settings,
        policy: cli
            .on_missing
            .or(cli.strict.then_some(NoMatchPolicy::Fail)),
        dry_run: cli.dry_run,
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Summary
        },
    };

    match cli.command {
        Commands::Csv => {
            commands::update_csv(&ProcessEnv, &options)?;
        }
        Commands::Metadata => {
            commands::update_metadata(&ProcessEnv, &options)?;
        }
    }

    Ok(())
}
