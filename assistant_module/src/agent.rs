use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::client::AssistantsApi;
use crate::errors::AssistantError;
use crate::run::{CancellationToken, RunDriver, RunDriverConfig};
use crate::tools::ToolRegistry;
use crate::types::{AssistantSpec, ConversationKey, Message, Reply};

/// Anything a channel can hand a user's message to.
///
/// Implementations never fail: errors are turned into an apology reply so a
/// bad turn cannot take down the channel's listener loop.
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle_message(&self, key: &ConversationKey, message: Message) -> Reply;

    /// Forget the conversation for `key`; the next message starts over.
    fn reset_conversation(&self, key: &ConversationKey);
}

/// Name, prompt and model of a remote assistant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub instructions: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Text returned to the user when a turn fails.
pub fn apology(err: &AssistantError) -> String {
    format!(
        "Sorry, I encountered an error processing your request:\n{}",
        err
    )
}

/// Reuse `existing_id` if the assistant exists, otherwise create one from
/// `profile` with the code interpreter and every tool in `tools`.
pub fn ensure_assistant(
    api: &dyn AssistantsApi,
    profile: &AgentProfile,
    existing_id: Option<&str>,
    tools: &ToolRegistry,
) -> Result<String, AssistantError> {
    if let Some(id) = existing_id.filter(|id| !id.trim().is_empty()) {
        let assistant = api.retrieve_assistant(id)?;
        info!(
            "using existing assistant {} ({})",
            assistant.id,
            assistant.name.as_deref().unwrap_or(&profile.name)
        );
        return Ok(assistant.id);
    }

    let mut tool_specs = vec![json!({ "type": "code_interpreter" })];
    tool_specs.extend(tools.definitions().iter().map(|d| d.to_function_tool()));
    let spec = AssistantSpec {
        name: profile.name.clone(),
        instructions: profile.instructions.clone(),
        model: profile.model.clone(),
        tools: tool_specs,
    };
    let assistant = api.create_assistant(&spec)?;
    info!(
        "created assistant {} ({}) with tools {:?}",
        assistant.id,
        profile.name,
        tools.names()
    );
    Ok(assistant.id)
}

/// A remote assistant with its own sessions and tools.
pub struct AssistantAgent {
    name: String,
    assistant_id: String,
    driver: RunDriver,
    cancel: CancellationToken,
}

impl AssistantAgent {
    pub fn new(
        name: impl Into<String>,
        assistant_id: impl Into<String>,
        api: Arc<dyn AssistantsApi>,
        tools: Arc<ToolRegistry>,
        config: RunDriverConfig,
    ) -> Self {
        Self {
            name: name.into(),
            assistant_id: assistant_id.into(),
            driver: RunDriver::new(api, tools, config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    pub fn driver(&self) -> &RunDriver {
        &self.driver
    }

    /// Like [`MessageHandler::handle_message`] but keeps the error.
    pub fn try_handle_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<Reply, AssistantError> {
        info!("{} received message from {}: {:?}", self.name, key, message.text);
        self.driver
            .handle_message(&self.assistant_id, key, message, &self.cancel)
    }
}

impl MessageHandler for AssistantAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_message(&self, key: &ConversationKey, message: Message) -> Reply {
        match self.try_handle_message(key, message) {
            Ok(reply) => reply,
            Err(err) => {
                error!("{} failed to answer {}: {}", self.name, key, err);
                Reply::text(apology(&err))
            }
        }
    }

    fn reset_conversation(&self, key: &ConversationKey) {
        self.driver.sessions().reset(key);
    }
}
