pub mod table;
pub mod message;

pub use table::{RateTable, RateEntry};
pub use message::RelayMessage;
