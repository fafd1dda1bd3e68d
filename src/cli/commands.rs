//! CLI commands

use crate::cache::{CacheStats, TimeSeriesCache};
use crate::config::Config;
use crate::core::helicorder::HelicorderSegment;
use crate::core::segment::SegmentPayload;
use crate::error::Result;
use crate::gulp::{ChannelListener, GulpRequest, GulperEvent, GulperScheduler, RequestOutcome};
use crate::upstream::{FetchKind, SyntheticSource};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// seisgulp CLI
#[derive(Parser)]
#[command(name = "seisgulp")]
#[command(about = "Seismic time-series cache and incremental backfill")]
pub struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Wave,
    Helicorder,
    Rsam,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backfill a range from the synthetic source and report what was cached
    Gulp {
        /// Channel name, e.g. "AB CH" or "AB$CH"
        #[arg(short, long)]
        channel: String,
        /// Range start, epoch seconds
        #[arg(long)]
        start: f64,
        /// Range end, epoch seconds
        #[arg(long)]
        end: f64,
        /// Data kind to gulp
        #[arg(short, long, value_enum, default_value = "wave")]
        kind: KindArg,
        /// RSAM period in seconds
        #[arg(long, default_value = "600")]
        period: f64,
        /// Chunk size in seconds (defaults to the configured value for the kind)
        #[arg(long)]
        chunk: Option<f64>,
        /// Delay between chunks in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Sample rate of the synthetic waveform
        #[arg(long, default_value = "20")]
        sample_rate: f64,
        /// Total memory (MiB) that fractional budgets are resolved against
        #[arg(long, default_value = "1024")]
        memory_total_mb: u64,
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path),
        None => Ok(Config::default()),
    }
}

/// Summary printed after a gulp finishes.
#[derive(Debug, Serialize)]
pub struct GulpSummary {
    pub channel: String,
    pub start: f64,
    pub end: f64,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    pub killed: bool,
    pub covered: Option<(f64, f64)>,
    pub stats: CacheStats,
}

pub struct GulpArgs {
    pub channel: String,
    pub start: f64,
    pub end: f64,
    pub kind: KindArg,
    pub period: f64,
    pub chunk: Option<f64>,
    pub delay_ms: Option<u64>,
    pub sample_rate: f64,
    pub memory_total_mb: u64,
}

/// Run one gulp to completion, printing each listener event as a JSON line.
pub async fn run_gulp(config: &Config, args: GulpArgs) -> Result<GulpSummary> {
    let cache = Arc::new(TimeSeriesCache::from_config(
        &config.cache,
        args.memory_total_mb * 1024 * 1024,
    ));
    let scheduler = GulperScheduler::new(Arc::clone(&cache));

    let kind = match args.kind {
        KindArg::Wave => FetchKind::Wave,
        KindArg::Helicorder => FetchKind::Helicorder,
        KindArg::Rsam => FetchKind::Rsam { period: args.period },
    };
    let mut request = GulpRequest::new(
        format!("synthetic:{}", args.channel),
        args.channel.clone(),
        args.start,
        args.end,
    )
    .for_kind(kind, &config.gulper);
    if let Some(chunk) = args.chunk {
        request.chunk_size = chunk;
    }
    if let Some(delay_ms) = args.delay_ms {
        request.delay = Duration::from_millis(delay_ms);
    }

    let (listener, mut events) = ChannelListener::channel();
    let source = Arc::new(SyntheticSource::new(args.sample_rate));
    let outcome = scheduler.request(request, listener, source)?;

    let mut summary = GulpSummary {
        channel: args.channel.clone(),
        start: args.start,
        end: args.end,
        chunks_ok: 0,
        chunks_failed: 0,
        killed: false,
        covered: None,
        stats: CacheStats::default(),
    };

    match &outcome {
        &RequestOutcome::Fetched { success } => {
            info!(success, "range below one chunk, fetched directly");
            if success {
                summary.chunks_ok = 1;
            } else {
                summary.chunks_failed = 1;
            }
        }
        RequestOutcome::Started(_) | RequestOutcome::Attached(_) => {
            while let Some(event) = events.recv().await {
                println!("{}", serde_json::to_string(&event)?);
                match event {
                    GulperEvent::Started => {}
                    GulperEvent::Gulped { success: true, .. } => summary.chunks_ok += 1,
                    GulperEvent::Gulped { success: false, .. } => summary.chunks_failed += 1,
                    GulperEvent::Stopped { killed } => {
                        summary.killed = killed;
                        break;
                    }
                }
            }
        }
    }

    summary.covered = match kind {
        FetchKind::Wave => cache
            .get_best(&args.channel, args.start, args.end)
            .map(|w| (w.start, w.end())),
        FetchKind::Helicorder => cache
            .get::<HelicorderSegment>(&args.channel, args.start, args.end)
            .map(|h| (h.range().start, h.range().end)),
        FetchKind::Rsam { period } => cache
            .get_rsam(&args.channel, args.start, args.end, period)
            .map(|r| (r.range().start, r.range().end)),
    };
    // the worker announces stopped() just before its thread returns
    if let Some(gulper) = outcome.gulper() {
        gulper.join();
    }
    summary.stats = cache.stats();
    Ok(summary)
}
