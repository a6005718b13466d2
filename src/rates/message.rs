use std::fmt;

pub const PREFIX_CURRENCY: &str = "[CURRENCY]";
pub const PREFIX_DATA: &str = "[DATA]";

/// A tagged text message carried on the shared topic.
///
/// Wire form is `<TAG> <payload>` with a single space after the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Currency(String),
    Data(String),
}

impl RelayMessage {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_end();
        let mut tokens = text.split(' ');

        match tokens.next()? {
            PREFIX_CURRENCY => tokens
                .next()
                .filter(|code| !code.is_empty())
                .map(|code| RelayMessage::Currency(code.to_string())),
            PREFIX_DATA => text
                .split_once(' ')
                .map(|(_, rate)| rate)
                .filter(|rate| !rate.is_empty())
                .map(|rate| RelayMessage::Data(rate.to_string())),
            _ => None,
        }
    }

    pub fn from_bytes(payload: &[u8]) -> Option<Self> {
        std::str::from_utf8(payload).ok().and_then(Self::parse)
    }
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMessage::Currency(code) => write!(f, "{} {}", PREFIX_CURRENCY, code),
            RelayMessage::Data(rate) => write!(f, "{} {}", PREFIX_DATA, rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_currency() {
        assert_eq!(
            RelayMessage::parse("[CURRENCY] BTC"),
            Some(RelayMessage::Currency("BTC".to_string()))
        );
        // Trailing tokens after the code are ignored
        assert_eq!(
            RelayMessage::parse("[CURRENCY] EUR please\r\n"),
            Some(RelayMessage::Currency("EUR".to_string()))
        );
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(
            RelayMessage::parse("[DATA] 42'155.80USD"),
            Some(RelayMessage::Data("42'155.80USD".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_or_malformed() {
        assert_eq!(RelayMessage::parse(""), None);
        assert_eq!(RelayMessage::parse("[CURRENCY]"), None);
        assert_eq!(RelayMessage::parse("[CURRENCY]  BTC"), None);
        assert_eq!(RelayMessage::parse("CURRENCY BTC"), None);
        assert_eq!(RelayMessage::parse("hello [CURRENCY] BTC"), None);
        assert_eq!(RelayMessage::parse("[DATA]"), None);
    }

    #[test]
    fn test_from_bytes_rejects_invalid_utf8() {
        assert_eq!(RelayMessage::from_bytes(&[0xff, 0xfe, 0x20, 0x41]), None);
        assert_eq!(
            RelayMessage::from_bytes(b"[CURRENCY] CZK"),
            Some(RelayMessage::Currency("CZK".to_string()))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(RelayMessage::Currency("RUB".to_string()).to_string(), "[CURRENCY] RUB");
        assert_eq!(RelayMessage::Data("0.011USD".to_string()).to_string(), "[DATA] 0.011USD");
    }
}
