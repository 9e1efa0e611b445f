// src/main.rs
use anyhow::Context;
use box_sentinel::{
    config::load_config,
    market::build_registry,
    notify::{alert_channel, AlertTransport, LogTransport, NotificationSink, WebhookTransport},
    pipeline::Pipeline,
    state::{MemoryStateStore, RedisStateStore, StateStore},
    utils::{parse_level, setup_logging},
};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("invalid configuration")?;
    setup_logging(parse_level(&config.log_level), config.log_file.as_deref())
        .context("failed to initialize logging")?;
    info!("🚀 Box Sentinel starting...");
    config.validate_and_log();

    let clients = build_registry(&config).context("failed to build provider clients")?;
    info!("Provider clients ready: {}", clients.len());

    let store: Arc<dyn StateStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisStateStore::connect(url, &config.state_namespace)
                .await
                .context("failed to connect to Redis")?;
            info!("💾 State persisted to Redis (namespace '{}')", config.state_namespace);
            Arc::new(store)
        }
        None => {
            warn!("REDIS_URL not set, state will not survive a restart");
            Arc::new(MemoryStateStore::new())
        }
    };

    let transport: Arc<dyn AlertTransport> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookTransport::new(url, config.http_timeout_secs)?),
        None => {
            info!("ALERT_WEBHOOK_URL not set, alerts go to the log only");
            Arc::new(LogTransport)
        }
    };
    let (queue, dispatcher) = alert_channel(config.alerts.clone(), transport);
    let dispatcher = tokio::spawn(dispatcher.run());

    let sink: Arc<dyn NotificationSink> = Arc::new(queue.clone());
    let pipeline = Arc::new(Pipeline::new(config.clone(), clients, store, sink));

    pipeline.recover(Utc::now()).await.context("state recovery failed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(pipeline.clone().run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("🛑 Shutdown requested, finishing in-flight cycles...");
    if shutdown_tx.send(true).is_err() {
        warn!("Pipeline loops already stopped");
    }
    if let Err(e) = runner.await {
        error!("Pipeline task failed: {}", e);
    }

    // Dropping the last producers lets the dispatcher drain and exit.
    drop(queue);
    drop(pipeline);
    if let Err(e) = dispatcher.await {
        error!("Alert dispatcher failed: {}", e);
    }
    info!("👋 Box Sentinel stopped");
    Ok(())
}
