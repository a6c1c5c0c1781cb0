use autoflow_config::ConfigResolver;
use autoflow_queue::Dispatcher;
use autoflow_scheduler::{AppContext, SchedulerError, ensure_shared_queue};
use rootcause::prelude::Report;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Report<SchedulerError>> {
    let config =
        ConfigResolver::from_env().map_err(|report| report.context(SchedulerError::Configuration))?;
    ensure_shared_queue(&config)?;

    let context = AppContext::build(config).await?;
    context.log_configuration();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    Dispatcher::new(context.dispatcher.clone())
        .run_maintenance(Arc::clone(&context.consumer), shutdown_rx)
        .await;
    Ok(())
}
