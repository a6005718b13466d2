pub mod controller;
pub mod listener;
pub mod publisher;
pub mod selector;
pub mod state;

pub use controller::SelectorLoop;
pub use listener::BrokerListener;
pub use publisher::{MqttPublisher, Publisher};
pub use selector::Selector;
pub use state::{RelayState, RelayStatus};
