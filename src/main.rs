use dotenvy::dotenv;
use marketplace_settlement::{
    config::{self, database, settlement::GatewayProvider},
    core::{context::SettlementContext, reconcile},
    errors::Result,
    integrations::{gateway::gateway_for, notifier::TracingNotifier},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    // 3. Load the settlement policy
    let settlement_config = config::settlement::load_from_env()
        .inspect_err(|e| error!("Failed to load settlement configuration: {}", e))?;

    // 4. Connect and make sure the schema exists
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Pick the gateway adapter; refunds are only swept when one is configured
    let gateway = gateway_for(&settlement_config.gateway);
    let sweep_refunds = settlement_config.gateway.provider != GatewayProvider::Disabled;
    if !sweep_refunds {
        warn!("No payment gateway configured, pending refunds will not be retried");
    }

    // 6. Run the reconciliation sweeps until Ctrl-C
    let ctx = SettlementContext::new(db, settlement_config, gateway, Arc::new(TracingNotifier));
    info!(
        interval_secs = ctx.config.reconciliation.interval_secs,
        sweep_refunds,
        "Settlement worker started"
    );
    tokio::select! {
        () = reconcile::run_periodically(ctx, sweep_refunds) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
        }
    }

    Ok(())
}
