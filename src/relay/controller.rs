use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use log::{info, warn, error, debug};

use crate::rates::{RateTable, RelayMessage};
use crate::relay::publisher::Publisher;
use crate::relay::selector::Selector;
use crate::relay::state::{RelayState, RelayStatus};

// A payload delivered by the broker, forwarded from the network task
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Published { code: String, rate: String },
    Skipped,
    Failed,
}

/// Owns the current selection and drives the periodic publication.
///
/// Inbound messages and ticks are handled on the same task, so a tick always
/// sees a fully applied selection.
pub struct SelectorLoop<P: Publisher> {
    rates: Arc<RateTable>,
    selector: Selector,
    publisher: P,
    topic: String,
    status: RelayStatus,
}

impl<P: Publisher> SelectorLoop<P> {
    pub fn new(
        rates: Arc<RateTable>,
        selector: Selector,
        publisher: P,
        topic: String,
        status: RelayStatus,
    ) -> Self {
        Self {
            rates,
            selector,
            publisher,
            topic,
            status,
        }
    }

    /// Applies a selection message. Returns true when the selector changed hands
    /// to a known code; anything else is dropped without surfacing an error.
    pub fn on_message_received(&self, topic: &str, payload: &[u8]) -> bool {
        if topic != self.topic {
            debug!("Ignoring message on unexpected topic {}", topic);
            self.status.record_ignored();
            return false;
        }

        let code = match RelayMessage::from_bytes(payload) {
            Some(RelayMessage::Currency(code)) => code,
            // Rate messages, including our own echoes on the shared topic
            Some(RelayMessage::Data(_)) => return false,
            None => {
                debug!("Ignoring unrecognized message: {}", String::from_utf8_lossy(payload));
                self.status.record_ignored();
                return false;
            }
        };

        if !self.rates.contains(&code) {
            debug!("Ignoring selection of unknown currency {}", code);
            self.status.record_ignored();
            return false;
        }

        // Our own tick echoes back here; only count actual changes
        let previous = self.selector.select(&code);
        if previous != code {
            info!("Currency selection changed: {} -> {}", previous, code);
            self.status.record_selection();
        }
        true
    }

    // Publishes the selection message followed by its rate
    pub fn publish_tick(&self) -> TickOutcome {
        let code = self.selector.current();
        let rate = match self.rates.rate_for(&code) {
            Some(rate) => rate.to_string(),
            None => {
                warn!("No rate for selected currency {}, skipping tick", code);
                return TickOutcome::Skipped;
            }
        };

        let selection = RelayMessage::Currency(code.clone()).to_string();
        if let Err(e) = self.publisher.publish(&self.topic, selection) {
            error!("Failed to publish selection for {}: {}", code, e);
            return TickOutcome::Failed;
        }

        let data = RelayMessage::Data(rate.clone()).to_string();
        if let Err(e) = self.publisher.publish(&self.topic, data) {
            error!("Failed to publish rate for {}: {}", code, e);
            return TickOutcome::Failed;
        }

        self.status.transition(RelayState::Connected, RelayState::Publishing);
        self.status.record_tick();

        TickOutcome::Published { code, rate }
    }

    /// Runs until the token is cancelled. The first tick fires one full
    /// period after start.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("📊 Publishing to '{}' every {}s, starting with {}",
              self.topic, period.as_secs(), self.selector.current());

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("🛑 Publish loop stopping");
                    break;
                }
                Some(message) = inbound.recv() => {
                    self.on_message_received(&message.topic, &message.payload);
                }
                _ = ticker.tick() => {
                    if let TickOutcome::Published { code, rate } = self.publish_tick() {
                        debug!("Published {} = {} to {}", code, rate, self.topic);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::publisher::testing::RecordingPublisher;

    const TOPIC: &str = "test";

    fn new_loop(publisher: Arc<RecordingPublisher>) -> SelectorLoop<Arc<RecordingPublisher>> {
        let status = RelayStatus::new();
        status.set_state(RelayState::Connected);
        SelectorLoop::new(
            Arc::new(RateTable::builtin()),
            Selector::new("RUB"),
            publisher,
            TOPIC.to_string(),
            status,
        )
    }

    fn select(relay: &SelectorLoop<Arc<RecordingPublisher>>, code: &str) -> bool {
        relay.on_message_received(TOPIC, format!("[CURRENCY] {}", code).as_bytes())
    }

    #[test]
    fn test_known_codes_publish_their_pair() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());
        let rates = RateTable::builtin();

        for code in rates.codes() {
            publisher.clear();
            assert!(select(&relay, code));
            relay.publish_tick();

            assert_eq!(
                publisher.payloads(),
                vec![
                    format!("[CURRENCY] {}", code),
                    format!("[DATA] {}", rates.rate_for(code).unwrap()),
                ]
            );
        }
    }

    #[test]
    fn test_unknown_code_leaves_selector_unchanged() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher);

        assert!(select(&relay, "BTC"));
        assert!(!select(&relay, "ZZZ"));
        assert!(!select(&relay, "btc"));
        assert_eq!(relay.selector.current(), "BTC");
    }

    #[test]
    fn test_btc_then_unknown_then_tick() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());

        select(&relay, "BTC");
        select(&relay, "ZZZ");
        let outcome = relay.publish_tick();

        assert_eq!(
            outcome,
            TickOutcome::Published { code: "BTC".to_string(), rate: "42'155.80USD".to_string() }
        );
        assert_eq!(publisher.payloads(), vec!["[CURRENCY] BTC", "[DATA] 42'155.80USD"]);
        assert!(publisher.sent().iter().all(|(topic, _)| topic == TOPIC));
    }

    #[test]
    fn test_echoed_selection_is_not_counted() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());

        // The tick's own selection message comes back on the shared topic
        relay.publish_tick();
        let echo = publisher.payloads()[0].clone();
        assert!(relay.on_message_received(TOPIC, echo.as_bytes()));
        assert_eq!(relay.status.get_stats().1, 0);

        assert!(select(&relay, "ETH"));
        assert!(select(&relay, "ETH"));
        assert_eq!(relay.status.get_stats().1, 1);
    }

    #[test]
    fn test_reselection_has_no_memory() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());

        select(&relay, "EUR");
        relay.publish_tick();
        let first = publisher.payloads();

        select(&relay, "CZK");
        select(&relay, "EUR");
        publisher.clear();
        relay.publish_tick();

        assert_eq!(publisher.payloads(), first);
    }

    #[test]
    fn test_non_selection_messages_are_ignored() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher);

        assert!(!relay.on_message_received(TOPIC, b"[DATA] 1.09USD"));
        assert!(!relay.on_message_received(TOPIC, b"hello world"));
        assert!(!relay.on_message_received(TOPIC, &[0xc3, 0x28]));
        assert!(!relay.on_message_received("other", b"[CURRENCY] ETH"));
        assert_eq!(relay.selector.current(), "RUB");
    }

    #[test]
    fn test_missing_rate_skips_tick() {
        let publisher = RecordingPublisher::new();
        let relay = SelectorLoop::new(
            Arc::new(RateTable::builtin()),
            Selector::new("XYZ"),
            publisher.clone(),
            TOPIC.to_string(),
            RelayStatus::new(),
        );

        assert_eq!(relay.publish_tick(), TickOutcome::Skipped);
        assert!(publisher.payloads().is_empty());
    }

    #[test]
    fn test_publish_failure_is_contained() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());

        publisher.set_failing(true);
        assert_eq!(relay.publish_tick(), TickOutcome::Failed);
        assert_eq!(relay.status.get_stats().0, 0);

        publisher.set_failing(false);
        assert!(matches!(relay.publish_tick(), TickOutcome::Published { .. }));
        assert_eq!(relay.status.get_state(), RelayState::Publishing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_pair_repeats_every_period() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(relay.run(rx, Duration::from_secs(5), cancel.clone()));

        // Nothing before the first full period
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(publisher.payloads().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            publisher.payloads(),
            vec!["[CURRENCY] RUB", "[DATA] 0.011USD", "[CURRENCY] RUB", "[DATA] 0.011USD"]
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_selection_applies_before_next_tick() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(relay.run(rx, Duration::from_secs(5), cancel.clone()));

        for text in ["[CURRENCY] BTC", "[CURRENCY] ZZZ"] {
            tx.send(InboundMessage { topic: TOPIC.to_string(), payload: text.as_bytes().to_vec() })
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(publisher.payloads(), vec!["[CURRENCY] BTC", "[DATA] 42'155.80USD"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep_stops_publishing() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(relay.run(rx, Duration::from_secs(5), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(7500)).await;
        cancel.cancel();
        handle.await.unwrap();
        let published = publisher.payloads().len();
        assert_eq!(published, 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(publisher.payloads().len(), published);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_inbound_channel_keeps_publishing() {
        let publisher = RecordingPublisher::new();
        let relay = new_loop(publisher.clone());
        let (tx, rx) = mpsc::channel(8);
        drop(tx);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(relay.run(rx, Duration::from_secs(5), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10100)).await;
        assert_eq!(publisher.payloads().len(), 4);

        cancel.cancel();
        handle.await.unwrap();
    }
}
