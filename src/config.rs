use std::env;
use std::str::FromStr;
use log::warn;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::rates::RateTable;

// Broker Configuration
pub const DEFAULT_BROKER_HOST: &str = "broker.emqx.io";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "test";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const CLIENT_ID_PREFIX: &str = "rate-relay";

// Relay Configuration
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const INBOUND_CHANNEL_SIZE: usize = 64;
pub const CLIENT_REQUEST_CAPACITY: usize = 10;

// Status API Configuration
pub const DEFAULT_STATUS_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const STATUS_API_DISABLED: &str = "off";

pub struct Config {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub publish_interval_secs: u64,
    pub default_currency: Option<String>,
    pub rates_file: Option<String>,
    pub status_bind_address: Option<String>,
    pub shutdown_grace_secs: u64,
    pub log_level: String,
}

// Falls back to the default when the variable is unset or fails to parse
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value '{}' for {}, using default", raw, key);
            default
        }),
        Err(_) => default,
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", CLIENT_ID_PREFIX, &suffix[..8])
}

impl Config {
    pub fn from_env() -> Self {
        let status_bind_address = match env_opt("STATUS_BIND_ADDRESS") {
            Some(addr) if addr.eq_ignore_ascii_case(STATUS_API_DISABLED) => None,
            Some(addr) => Some(addr),
            None => Some(DEFAULT_STATUS_BIND_ADDRESS.to_string()),
        };

        Self {
            broker_host: env_opt("BROKER_HOST")
                .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
            broker_port: env_or("BROKER_PORT", DEFAULT_BROKER_PORT),
            topic: env_opt("MQTT_TOPIC")
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            client_id: env_opt("MQTT_CLIENT_ID")
                .unwrap_or_else(default_client_id),
            keep_alive_secs: env_or("KEEP_ALIVE_SECS", DEFAULT_KEEP_ALIVE_SECS),
            publish_interval_secs: env_or("PUBLISH_INTERVAL_SECS", DEFAULT_PUBLISH_INTERVAL_SECS),
            default_currency: env_opt("DEFAULT_CURRENCY"),
            rates_file: env_opt("RATES_FILE"),
            status_bind_address,
            shutdown_grace_secs: env_or("SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_host.is_empty() {
            return Err(RelayError::Config("Broker host must not be empty".to_string()));
        }

        if self.broker_port == 0 {
            return Err(RelayError::Config("Broker port must be non-zero".to_string()));
        }

        // The relay publishes to this topic, so MQTT wildcards are not allowed
        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(RelayError::Config(format!(
                "Topic '{}' must be non-empty and free of wildcards", self.topic
            )));
        }

        if self.client_id.is_empty() {
            return Err(RelayError::Config("Client id must not be empty".to_string()));
        }

        if self.keep_alive_secs == 0 || self.keep_alive_secs > u64::from(u16::MAX) {
            return Err(RelayError::Config(format!(
                "Keep-alive must be between 1 and {} seconds", u16::MAX
            )));
        }

        if self.publish_interval_secs == 0 {
            return Err(RelayError::Config("Publish interval must be at least 1 second".to_string()));
        }

        Ok(())
    }

    // Resolves the starting selection against the loaded table
    pub fn initial_currency(&self, rates: &RateTable) -> Result<String> {
        match &self.default_currency {
            Some(code) if rates.contains(code) => Ok(code.clone()),
            Some(code) => Err(RelayError::Config(format!(
                "Default currency '{}' is not in the rate table", code
            ))),
            None => rates
                .default_code()
                .map(str::to_string)
                .ok_or_else(|| RelayError::Config("Rate table is empty".to_string())),
        }
    }

    pub fn log_config(&self) {
        println!("Relay Configuration:");
        println!("  Broker: {}:{}", self.broker_host, self.broker_port);
        println!("  Topic: {}", self.topic);
        println!("  Client Id: {}", self.client_id);
        println!("  Keep-Alive: {}s", self.keep_alive_secs);
        println!("  Publish Interval: {}s", self.publish_interval_secs);
        println!("  Default Currency: {}", self.default_currency.as_deref().unwrap_or("(first table entry)"));
        println!("  Rates File: {}", self.rates_file.as_deref().unwrap_or("(built-in)"));
        println!("  Status API: {}", self.status_bind_address.as_deref().unwrap_or("disabled"));
        println!("  Log Level: {}", self.log_level);
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            topic: DEFAULT_TOPIC.to_string(),
            client_id: "rate-relay-test".to_string(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            default_currency: None,
            rates_file: None,
            status_bind_address: None,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            log_level: "info".to_string(),
        }
    }
}
