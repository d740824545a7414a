use std::{env, io};

use anyhow::Context;
use bonus_ledger::csv::{read_events, write_balances};
use bonus_ledger::{Ledger, LedgerConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .context("usage: bonus-ledger <events.csv>")?;

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = LedgerConfig::load().context("failed to load configuration")?;
    let ledger = Ledger::open(&config).await?;
    ledger.initialize().await?;

    let events = read_events(path)?;
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::task::spawn_blocking(move || {
        for result in events {
            match result {
                Ok(event) => {
                    if event_sender.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(event_receiver)).await;
    reader.await?;

    // reported through the log, exit status is unaffected
    ledger.audit().await?;

    let balances = ledger.account_summaries().await?;
    write_balances(io::stdout().lock(), balances)?;
    Ok(())
}
