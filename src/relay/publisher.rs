use std::sync::Arc;
use rumqttc::{AsyncClient, QoS};

use crate::error::{RelayError, Result};

/// Outbound side of the broker link.
///
/// Publishing only enqueues; it must never block the caller, so a stalled or
/// lost connection shows up as an error instead of a hang.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, topic: &str, payload: String) -> Result<()> {
        (**self).publish(topic, payload)
    }
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| RelayError::Publish(e.to_string()))
    }
}
