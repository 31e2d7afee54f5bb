//! DPU frame replay
//!
//! Replays recorded window batches through the DPU helper layer: update
//! region planning, content protection reconciliation against a simulated
//! secure monitor, and buffer leak checks.

mod config;
mod monitor;
mod replay;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    no_pace: bool,
}

impl Args {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut parsed = Args::default();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = iter.next().context("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--no-pace" => parsed.no_pace = true,
                _ if parsed.script.is_none() => parsed.script = Some(PathBuf::from(arg)),
                _ => anyhow::bail!("Unexpected argument: {}", arg),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dpu=debug,dpu_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting DPU frame replay");

    let args = Args::parse(std::env::args().skip(1))?;
    let script_path = args
        .script
        .context("usage: dpu <frames.json> [--config <path>] [--no-pace]")?;

    let config = config::Config::load(args.config.as_deref())?;

    let text = tokio::fs::read_to_string(&script_path)
        .await
        .with_context(|| format!("Failed to read frame script {:?}", script_path))?;
    let script: replay::FrameScript =
        serde_json::from_str(&text).context("Failed to parse frame script")?;
    info!("Loaded {} frames from {:?}", script.frames.len(), script_path);

    let mut replayer = replay::Replayer::new(&config);
    if args.no_pace {
        replayer.set_paced(false);
    }

    let summaries = match replayer.run(&script).await {
        Ok(s) => s,
        Err(e) => {
            error!("Replay failed: {}", e);
            return Err(e);
        }
    };

    info!(
        "Final protection mask: {:?}",
        replayer.decon().protection().previous()
    );
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed =
            Args::parse(args(&["frames.json", "--config", "dpu.toml", "--no-pace"])).unwrap();
        assert_eq!(
            parsed,
            Args {
                script: Some(PathBuf::from("frames.json")),
                config: Some(PathBuf::from("dpu.toml")),
                no_pace: true,
            }
        );
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(Args::parse(args(&["--config"])).is_err());
        assert!(Args::parse(args(&["a.json", "b.json"])).is_err());
        assert_eq!(Args::parse(args(&[])).unwrap(), Args::default());
    }
}
