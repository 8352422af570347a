use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use mavg_core::config::parse_duration_ms;
use mavg_core::{Executor, InputSource, PipelineConfig};
use mavg_io::{FileSink, FileSource, Queue, QueueSource};
use mavg_ops::MovingAverage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "mavg",
    version,
    about = "Parse a stream of events to produce an aggregated output."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Per-minute moving average of delivery durations
    MovingAverage(MovingAverageArgs),
}

#[derive(Args, Debug, Default)]
struct MovingAverageArgs {
    /// Moving average window size in minutes (values < 1 fall back to 10)
    #[arg(long, alias = "window_size", allow_negative_numbers = true)]
    window_size: Option<i64>,
    /// File (JSON lines) that contains input events
    #[arg(long, alias = "input_file", conflicts_with = "queue_url")]
    input_file: Option<PathBuf>,
    /// SQS queue URL that contains input events
    #[arg(long, alias = "queue_url")]
    queue_url: Option<String>,
    /// Output folder to write output event files (stdout when omitted)
    #[arg(long, alias = "output_folder")]
    output_folder: Option<PathBuf>,
    /// TOML file with pipeline settings; flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serve /metrics on this port (0 disables)
    #[arg(long, default_value_t = 0)]
    metrics_port: u16,
}

impl MovingAverageArgs {
    fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(n) = self.window_size {
            cfg.window_size = n;
        }
        if self.input_file.is_some() || self.queue_url.is_some() {
            cfg.source.input_file = self.input_file.clone();
            cfg.source.queue_url = self.queue_url.clone();
        }
        if self.output_folder.is_some() {
            cfg.sink.output_folder = self.output_folder.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn app() -> Router {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics() -> String {
    mavg_core::metrics::render_prometheus()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::MovingAverage(args) => moving_average(args).await,
    }
}

/// Configuration is resolved before anything is bound or opened.
async fn moving_average(args: MovingAverageArgs) -> anyhow::Result<()> {
    let cfg = args.resolve()?;
    if args.metrics_port != 0 {
        let addr = SocketAddr::from(([127, 0, 0, 1], args.metrics_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("serving /metrics on {}", addr);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app()).await;
        });
    }
    run_moving_average(cfg).await
}

async fn run_moving_average(cfg: PipelineConfig) -> anyhow::Result<()> {
    let window_size = cfg.normalized_window_size();
    let input = cfg.input()?;

    let sink = match cfg.output_folder() {
        Some(folder) => FileSink::in_folder(folder),
        None => {
            warn!("output folder not provided, writing to stdout instead");
            FileSink::stdout()
        }
    };

    let mut exec = Executor::new();
    exec.operator(MovingAverage::new(window_size)).sink(sink);

    let started = Instant::now();
    match input {
        InputSource::File(path) => {
            info!(
                input_file = %path.display(),
                window_size = window_size.get(),
                "running moving average from file"
            );
            exec.source(FileSource::jsonl(path));
            let stats = exec
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("error processing input: {e}"))?;
            info!(
                events = stats.events,
                points = stats.points,
                elapsed = ?started.elapsed(),
                "successfully calculated moving average from file"
            );
        }
        InputSource::Queue(url) => {
            info!(
                queue_url = %url,
                window_size = window_size.get(),
                "running moving average from queue"
            );
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    on_signal.cancel();
                }
            });

            attach_queue(&mut exec, &url, &cfg, cancel).await?;
            let stats = exec
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("error processing input: {e}"))?;
            info!(events = stats.events, points = stats.points, "queue processing stopped");
        }
    }
    Ok(())
}

#[cfg(feature = "sqs")]
async fn attach_queue(
    exec: &mut Executor,
    url: &str,
    cfg: &PipelineConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let queue = mavg_io::SqsQueue::connect(url, &cfg.queue).await;
    exec.source(queue_source(queue, cfg, cancel)?);
    Ok(())
}

#[cfg(not(feature = "sqs"))]
async fn attach_queue(
    _exec: &mut Executor,
    _url: &str,
    _cfg: &PipelineConfig,
    _cancel: CancellationToken,
) -> anyhow::Result<()> {
    anyhow::bail!("queue input requires the `sqs` feature")
}

#[cfg_attr(not(feature = "sqs"), allow(dead_code))]
fn queue_source<Q: Queue>(
    queue: Q,
    cfg: &PipelineConfig,
    cancel: CancellationToken,
) -> anyhow::Result<QueueSource<Q>> {
    Ok(QueueSource::new(queue, cancel)
        .with_backoff(
            Duration::from_millis(parse_duration_ms(&cfg.queue.backoff_initial)?),
            Duration::from_millis(parse_duration_ms(&cfg.queue.backoff_max)?),
        )
        .with_dedup_capacity(cfg.queue.dedup_capacity))
}
