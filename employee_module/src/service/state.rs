use std::sync::Arc;

use crate::slack::SlackBot;

/// Shared by the webhook handlers.
#[derive(Clone, Default)]
pub struct AppState {
    /// `None` when no Slack bot token is configured.
    pub slack: Option<Arc<SlackBot>>,
    pub slack_signing_secret: Option<String>,
}

impl AppState {
    pub fn new(slack: Option<Arc<SlackBot>>, slack_signing_secret: Option<String>) -> Self {
        Self {
            slack,
            slack_signing_secret,
        }
    }
}
