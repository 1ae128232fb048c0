use std::sync::Arc;

use log::{error, info};
use sealed_reports::{LocalCoprocessor, ReportLedger, ServiceConfig, rpc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {e}"))?;

    let config = ServiceConfig::from_env()?;
    info!("Starting with {config:?}");

    let db = sled::open(&config.db_path)?;
    let coprocessor = Arc::new(LocalCoprocessor::open(&db, config.network_key)?);
    info!(
        "Coprocessor public key 0x{}",
        hex::encode(coprocessor.public_key().as_bytes())
    );
    let ledger = Arc::new(ReportLedger::open(
        &db,
        config.contract_address,
        coprocessor.clone(),
        config.event_capacity,
    )?);

    let (addr, handle) = rpc::start_server(config.listen_addr, ledger.clone(), coprocessor).await?;
    info!("Listening on http://{addr}");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Err(e) = handle.stop() {
        error!("Server already stopped: {e}");
    }
    handle.stopped().await;

    ledger.flush().await?;
    db.flush_async().await?;
    info!("Cleanup complete");
    Ok(())
}
