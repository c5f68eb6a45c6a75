use std::fmt;
use std::str::FromStr;

use assistant_module::types::ConversationKey;
use serde::{Deserialize, Serialize};

/// Platform a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Slack,
    Gmail,
    Notion,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Slack => "slack",
            Channel::Gmail => "gmail",
            Channel::Notion => "notion",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How conversation keys are composed from a sender identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionScope {
    /// One conversation per sender per platform.
    #[default]
    Platform,
    /// One conversation per sender, shared across platforms.
    User,
}

impl SessionScope {
    /// Conversation key for `user` (typically an email address) on `channel`.
    pub fn key(self, channel: Channel, user: &str) -> ConversationKey {
        let user = user.trim().to_ascii_lowercase();
        match self {
            SessionScope::Platform => ConversationKey::new(format!("{}:{}", channel, user)),
            SessionScope::User => ConversationKey::new(user),
        }
    }
}

impl FromStr for SessionScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "platform" => Ok(SessionScope::Platform),
            "user" => Ok(SessionScope::User),
            other => Err(format!("unknown session scope '{}'", other)),
        }
    }
}

/// Errors raised by the channel adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("send error: {0}")]
    SendError(String),
    #[error("parse error: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::SendError(err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::ParseError(err.to_string())
    }
}
