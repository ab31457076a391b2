//! Stratum CLI entry point

use clap::Parser;
use console::style;
use stratum::cli::{Cli, Commands};
use stratum::config::ConfigManager;
use stratum::error::StratumResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("stratum=warn"),
        1 => EnvFilter::new("stratum=info"),
        _ => EnvFilter::new("stratum=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> StratumResult<()> {
    let cli = Cli::parse();

    // Fingerprinting is pure and must not depend on a readable config
    if let Commands::Fingerprint(args) = cli.command {
        init_logging(cli.verbose, "text");
        return stratum::cli::commands::fingerprint(args);
    }

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    stratum::ui::init_theme();

    match cli.command {
        Commands::Fingerprint(_) => unreachable!("Fingerprint handled above"),
        Commands::Run(args) => stratum::cli::commands::run(args, &config).await,
        Commands::Copy(args) => stratum::cli::commands::copy(args, &config).await,
        Commands::Build(args) => stratum::cli::commands::build(args, &config).await,
        Commands::Snapshot(args) => stratum::cli::commands::snapshot(args, &config).await,
        Commands::Config(args) => stratum::cli::commands::config(args, &config, &manager).await,
    }
}
