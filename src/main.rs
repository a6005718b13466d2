mod api;
mod config;
mod error;
mod rates;
mod relay;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use log::{info, warn, error};
use tower_http::cors::CorsLayer;

use crate::config::{Config, INBOUND_CHANNEL_SIZE};
use crate::error::RelayError;
use crate::rates::RateTable;
use crate::relay::{BrokerListener, MqttPublisher, RelayState, RelayStatus, Selector, SelectorLoop};
use crate::api::{ApiState, create_api_router};

fn load_rates(config: &Config) -> Result<RateTable, RelayError> {
    match &config.rates_file {
        Some(path) => RateTable::load_from_file(path),
        None => {
            let rates = RateTable::builtin();
            info!("Using built-in rate table: {}", rates.codes().collect::<Vec<_>>().join(", "));
            Ok(rates)
        }
    }
}

async fn start_status_api(
    bind_address: &str,
    state: ApiState,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, RelayError> {
    let router = create_api_router(state)
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(bind_address).await?;
    info!("🌐 Status API running at http://{}/api", bind_address);

    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            error!("Status API stopped: {}", e);
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger before reading config so parse warnings are visible
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load configuration
    let config = Config::from_env();

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    let rates = Arc::new(load_rates(&config)?);
    let initial = config.initial_currency(&rates)?;
    let selector = Selector::new(initial);
    let status = RelayStatus::new();
    let cancel = CancellationToken::new();

    // Network task owns the event loop; the selector loop consumes what it forwards
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
    let listener = BrokerListener::new(&config, inbound_tx, status.clone());
    let publisher = MqttPublisher::new(listener.client());

    info!("Connecting to {}:{} as {}", config.broker_host, config.broker_port, config.client_id);
    let (ready_tx, ready_rx) = oneshot::channel();
    let listener_handle = tokio::spawn(listener.run(ready_tx, cancel.clone()));

    tokio::select! {
        outcome = ready_rx => match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Initial connection failed, exiting");
                if let Err(e) = listener_handle.await {
                    error!("Broker listener ended abnormally: {}", e);
                }
                return Err(e.into());
            }
            Err(_) => {
                return Err(RelayError::Connect("listener stopped before connecting".to_string()).into());
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted while connecting");
            cancel.cancel();
            if let Err(e) = listener_handle.await {
                error!("Broker listener ended abnormally: {}", e);
            }
            return Ok(());
        }
    }

    let api_handle = match &config.status_bind_address {
        Some(address) => {
            let api_state = ApiState {
                rates: rates.clone(),
                selector: selector.clone(),
                status: status.clone(),
                publisher: Arc::new(publisher.clone()),
                topic: config.topic.clone(),
            };
            match start_status_api(address, api_state, cancel.clone()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    // The relay itself does not depend on the status API
                    error!("Failed to start status API on {}: {}", address, e);
                    None
                }
            }
        }
        None => None,
    };

    let selector_loop = SelectorLoop::new(rates, selector, publisher, config.topic.clone(), status.clone());
    let period = Duration::from_secs(config.publish_interval_secs);
    let loop_handle = tokio::spawn(selector_loop.run(inbound_rx, period, cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Interrupt received, shutting down"),
        Err(e) => error!("Failed to listen for interrupt: {}, shutting down", e),
    }

    cancel.cancel();

    if let Err(e) = loop_handle.await {
        error!("Publish loop ended abnormally: {}", e);
    }

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    match tokio::time::timeout(grace, listener_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Broker listener ended abnormally: {}", e),
        Err(_) => {
            warn!("Broker did not acknowledge shutdown within {}s", grace.as_secs());
            status.set_state(RelayState::Disconnected);
        }
    }

    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!("Status API task ended abnormally: {}", e);
        }
    }

    let (ticks, selections, ignored) = status.get_stats();
    info!("Relay stopped after {} ticks ({} selections, {} ignored messages)", ticks, selections, ignored);

    Ok(())
}
