//! Frag ledger binary
//!
//! `frag-ledger` opens the ledger and runs until Ctrl-C.
//! `frag-ledger import <file.json>` replays one import request and prints
//! the report as JSON.

use anyhow::{bail, Context};
use frag_ledger::{Config, ImportRequest, Ledger, LogSink};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting frag ledger"
    );

    let ledger = Ledger::open(config)
        .context("opening ledger")?
        .with_notifications(Arc::new(LogSink));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down frag ledger");
        }
        [command, path] if command == "import" => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path))?;
            let request: ImportRequest =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
            let report = ledger.import(&request)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => bail!("usage: frag-ledger [import <file.json>]"),
    }

    ledger.shutdown().await?;
    Ok(())
}
