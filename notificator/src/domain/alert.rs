use std::fmt;

use serde::{Deserialize, Serialize};

/// A single inbound event worth notifying about.
///
/// Alerts have no identity: identical alerts are kept as separate entries so
/// that a burst is delivered as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Listener channel that produced the alert (e.g. `webhook`, `telegram`).
    pub channel: String,
    /// Message body.
    pub text: String,
    /// Sender as reported by the channel.
    pub from: String,
    /// Chat, thread or room reference. Empty when the channel has none.
    #[serde(default)]
    pub chat: String,
}

impl Alert {
    pub fn new(
        channel: impl Into<String>,
        from: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            from: from.into(),
            chat: String::new(),
        }
    }

    pub fn with_chat(mut self, chat: impl Into<String>) -> Self {
        self.chat = chat.into();
        self
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.channel, self.from, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let alert = Alert::new("telegram", "ops-bot", "disk full").with_chat("infra");
        assert_eq!(alert.to_string(), "telegram: ops-bot: disk full");
        assert_eq!(alert.chat, "infra");
    }

    #[test]
    fn test_chat_defaults_to_empty() {
        let alert: Alert =
            serde_json::from_str(r#"{"channel":"webhook","text":"t","from":"f"}"#).unwrap();
        assert!(alert.chat.is_empty());
    }
}
