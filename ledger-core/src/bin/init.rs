//! Ledger bootstrap binary
//!
//! Opens the configured store (migrating PostgreSQL), declares the
//! broadcast exchanges and exits. A topology mismatch exits non-zero.

use anyhow::Context;
use pin_bus::{declare_topology, NatsBroker};
use pin_ledger::{init_logging, open_store, store::run_then_close, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => {
            let mut config = Config::from_file(&path)?;
            config.apply_env()?;
            config
        }
        Err(_) => Config::from_env()?,
    };
    config.validate()?;

    init_logging(config.log_format, &config.log_level)?;

    tracing::info!(
        service = %config.service_name,
        backend = ?config.backend,
        "Starting ledger bootstrap"
    );

    let store = open_store(&config).await.context("opening ledger store")?;
    tracing::info!("Ledger store ready");

    run_then_close(store.as_ref(), async {
        let broker = NatsBroker::connect(&config.broker.url)
            .await
            .context("connecting to broker")?;

        declare_topology(&broker)
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    tracing::error!(error = %e, "Broker topology conflicts with this ledger");
                }
                e
            })
            .context("declaring broadcast topology")
    })
    .await?;

    tracing::info!("Ledger bootstrap complete");
    Ok(())
}
