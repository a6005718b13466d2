use std::time::Duration;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish,
    QoS, SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use log::{info, warn, error, debug};

use crate::config::{Config, CLIENT_REQUEST_CAPACITY};
use crate::error::{RelayError, Result};
use crate::relay::controller::InboundMessage;
use crate::relay::state::{RelayState, RelayStatus};

/// Network side of the relay: owns the MQTT event loop.
///
/// A single connection attempt is made. Once up, inbound publishes are
/// forwarded to the selector loop; a lost connection is logged and not
/// retried. On cancellation the listener unsubscribes, sends DISCONNECT and
/// keeps polling until the request has gone out.
pub struct BrokerListener {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    inbound: mpsc::Sender<InboundMessage>,
    status: RelayStatus,
}

impl BrokerListener {
    pub fn new(config: &Config, inbound: mpsc::Sender<InboundMessage>, status: RelayStatus) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, CLIENT_REQUEST_CAPACITY);

        Self {
            client,
            eventloop,
            topic: config.topic.clone(),
            inbound,
            status,
        }
    }

    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub fn on_connection_established(&self, code: ConnectReturnCode) {
        info!("🔗 Connected with result code {:?}", code);

        match self.client.try_subscribe(&self.topic, QoS::AtMostOnce) {
            Ok(()) => debug!("Subscription to '{}' requested", self.topic),
            Err(e) => error!("Failed to subscribe to '{}': {}", self.topic, e),
        }

        self.status.set_state(RelayState::Connected);
    }

    fn handle_incoming(&self, packet: Packet) {
        match packet {
            Packet::Publish(publish) => self.forward(publish),
            Packet::SubAck(ack) => {
                for code in ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(qos) => {
                            info!("Subscribed to '{}' with {:?}", self.topic, qos)
                        }
                        SubscribeReasonCode::Failure => {
                            error!("Broker rejected subscription to '{}'", self.topic)
                        }
                    }
                }
            }
            Packet::Disconnect => warn!("Broker sent DISCONNECT"),
            _ => {}
        }
    }

    fn forward(&self, publish: Publish) {
        debug!("Received on {}: {}", publish.topic, String::from_utf8_lossy(&publish.payload));

        let message = InboundMessage {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        };

        match self.inbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Inbound queue full, dropping message"),
            Err(TrySendError::Closed(_)) => debug!("Selector loop gone, dropping message"),
        }
    }

    /// Drives the connection for the lifetime of the relay. `ready` resolves
    /// once with the outcome of the initial connection attempt.
    pub async fn run(mut self, ready: oneshot::Sender<Result<()>>, cancel: CancellationToken) {
        self.status.set_state(RelayState::Connecting);

        loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.status.set_state(RelayState::Disconnected);
                    return;
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.on_connection_established(ack.code);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("❌ Connection failed: {}", e);
                    self.status.set_state(RelayState::Disconnected);
                    let _ = ready.send(Err(RelayError::Connect(e.to_string())));
                    return;
                }
            }
        }

        if ready.send(Ok(())).is_err() {
            debug!("Nobody waiting on connection outcome");
        }

        loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(packet)) => self.handle_incoming(packet),
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    error!("❌ Connection lost: {} (not reconnecting)", e);
                    self.status.set_state(RelayState::Disconnected);
                    return;
                }
            }
        }

        self.drain().await;
    }

    async fn drain(&mut self) {
        self.status.set_state(RelayState::Stopping);
        info!("Unsubscribing from '{}' and disconnecting", self.topic);

        if let Err(e) = self.client.try_unsubscribe(&self.topic) {
            warn!("Failed to request unsubscribe: {}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("👋 Disconnected from broker");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("Connection closed while draining: {}", e);
                    break;
                }
            }
        }

        self.status.set_state(RelayState::Disconnected);
    }
}
