//! seisgulp: Main entry point

use anyhow::Context;
use clap::Parser;
use seisgulp::cli::commands::{load_config, run_gulp, GulpArgs};
use seisgulp::cli::{Cli, Commands};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr, or to `log_file` when given. Stdout carries command
/// output only.
fn init_tracing(log_file: Option<&Path>, json: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(path) = log_file else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }
        return Ok(None);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("log file path {} has no file name", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref(), cli.log_json)?;

    match cli.command {
        Commands::Gulp {
            channel,
            start,
            end,
            kind,
            period,
            chunk,
            delay_ms,
            sample_rate,
            memory_total_mb,
            config,
        } => {
            let config = load_config(config.as_ref()).context("loading configuration")?;
            let summary = run_gulp(
                &config,
                GulpArgs {
                    channel,
                    start,
                    end,
                    kind,
                    period,
                    chunk,
                    delay_ms,
                    sample_rate,
                    memory_total_mb,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Config { config } => {
            let config = load_config(config.as_ref()).context("loading configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
