use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidelog::config::{LogFormat, LoggingConfig, SlidelogConfig};
use slidelog::ratelimit::{spawn_sweeper, Decision, PolicySet, RateLimiter};

/// Sliding window rate limiter.
///
/// Reads one client key per line from stdin and writes one JSON decision
/// per line to stdout.
#[derive(Debug, Parser)]
#[command(name = "slidelog", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a YAML policy file, replacing the configured policies
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Check keys against this named policy instead of the default quota
    #[arg(short, long)]
    policy: Option<String>,

    /// Override the configured log format
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    match value {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}', expected text or json", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SlidelogConfig::load(args.config.as_deref())?;
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting slidelog");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = Arc::new(RateLimiter::from_config(&config)?);
    if let Some(path) = &args.policies {
        limiter.set_policies(PolicySet::from_file(path)?);
    }
    if let Some(policy) = &args.policy {
        if limiter.policy(policy).is_none() {
            anyhow::bail!("policy '{}' is not configured", policy);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(
        limiter.clone(),
        Duration::from_secs(config.limiter.sweep_interval_secs.max(1)),
        shutdown_rx,
    );

    tokio::select! {
        result = serve_lines(
            &limiter,
            args.policy.as_deref(),
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        ) => {
            result?;
            info!("Input closed");
        }
        result = shutdown_signal() => result?,
    }

    let _ = shutdown_tx.send(true);
    sweeper.await?;

    info!(keys = limiter.key_count(), "slidelog stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    // Decisions go to stdout, so logs use stderr.
    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Answer one decision per input line until the input closes.
///
/// Lines that are not valid UTF-8 are logged and skipped.
async fn serve_lines<R, W>(
    limiter: &RateLimiter,
    policy: Option<&str>,
    mut reader: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, bytes = buf.len(), "Skipping key that is not valid UTF-8");
                continue;
            }
        };
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let decision = match policy {
            Some(policy) => limiter.check_policy(policy, key)?,
            None => limiter.check_quota(key, &limiter.default_quota()),
        };
        if !decision.allowed {
            warn!(key = %key, retry_after_ms = decision.retry_after.as_millis() as u64, "Request throttled");
        }

        let mut out = render_decision(key, &decision);
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn render_decision(key: &str, decision: &Decision) -> String {
    serde_json::json!({
        "key": key,
        "allowed": decision.allowed,
        "limit": decision.limit,
        "remaining": decision.remaining,
        "retry_after_ms": decision.retry_after.as_millis() as u64,
    })
    .to_string()
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminated = terminate.recv();

    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminated => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    Ok(())
}
