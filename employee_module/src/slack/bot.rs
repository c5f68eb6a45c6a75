use std::sync::{Arc, OnceLock};

use assistant_module::agent::MessageHandler;
use assistant_module::types::{File, Message};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::channel::{AdapterError, Channel, SessionScope};
use crate::image_host::{is_image, ImageHost};

use super::client::SlackClient;
use super::events::{EventAction, SlackEvent, SlashCommand};

pub const GREETING: &str = "Thanks for adding me! Happy to be of service.";

pub const HELP_TEXT: &str = "Here's what I can do:\n- Respond to DMs\n- Reply when @mentioned\n- See all messages in channels I'm in\n- Use /bothelp for this help message";

pub const RESET_TEXT: &str =
    "Got it. Once any reply in progress is sent, your next message starts a new conversation.";

/// Connects Slack conversations to a message handler.
pub struct SlackBot {
    client: SlackClient,
    handler: Arc<dyn MessageHandler>,
    scope: SessionScope,
    image_host: Option<Arc<dyn ImageHost>>,
    bot_user_id: OnceLock<String>,
}

impl SlackBot {
    pub fn new(client: SlackClient, handler: Arc<dyn MessageHandler>, scope: SessionScope) -> Self {
        Self {
            client,
            handler,
            scope,
            image_host: None,
            bot_user_id: OnceLock::new(),
        }
    }

    pub fn with_image_host(mut self, host: Arc<dyn ImageHost>) -> Self {
        self.image_host = Some(host);
        self
    }

    pub fn client(&self) -> &SlackClient {
        &self.client
    }

    /// Blocking; run it off the async executor.
    pub fn handle_event(&self, event: &SlackEvent) -> Result<(), AdapterError> {
        match event.action() {
            EventAction::Respond => self.respond(event),
            EventAction::MemberJoined => self.greet(event),
            EventAction::Observe => {
                info!(
                    "slack message in {}: {}",
                    event.channel.as_deref().unwrap_or("?"),
                    event.text.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            EventAction::Ignore => {
                debug!("ignoring slack event {}", event.kind);
                Ok(())
            }
        }
    }

    /// Immediate answer to a slash command. Makes no remote calls.
    pub fn command_reply(&self, command: &SlashCommand) -> String {
        match command.command.as_str() {
            "/bothelp" => HELP_TEXT.to_string(),
            "/reset" => RESET_TEXT.to_string(),
            other => format!("Unknown command {}. Try /bothelp.", other),
        }
    }

    /// Blocking: `/reset` waits for the caller's turn in flight, if any.
    pub fn run_command(&self, command: &SlashCommand) {
        if command.command == "/reset" {
            let key = self.scope.key(Channel::Slack, &self.sender(&command.user_id));
            self.handler.reset_conversation(&key);
            info!("reset conversation {}", key);
        }
    }

    fn respond(&self, event: &SlackEvent) -> Result<(), AdapterError> {
        let channel = event
            .channel
            .as_deref()
            .ok_or_else(|| AdapterError::ParseError("event has no channel".to_string()))?;
        let user = event
            .user
            .as_deref()
            .ok_or_else(|| AdapterError::ParseError("event has no user".to_string()))?;

        if let Some(ts) = event.ts.as_deref() {
            if let Err(err) = self.client.add_reaction(channel, ts, "eyes") {
                warn!("could not acknowledge {} in {}: {}", ts, channel, err);
            }
        }

        let key = self.scope.key(Channel::Slack, &self.sender(user));
        let files = self.download_files(event);
        info!(
            "slack turn for {} in {} with {} file(s)",
            key,
            channel,
            files.len()
        );

        let reply = self
            .handler
            .handle_message(&key, Message::new(event.clean_text()).with_files(files));

        let thread_ts = event.thread_ts.as_deref();
        let mut image_urls = Vec::new();
        for mut file in reply.attachments {
            match self.publish(channel, thread_ts, &mut file) {
                Ok(Some(url)) => image_urls.push(url),
                Ok(None) => {}
                Err(err) => warn!("could not deliver {}: {}", file.display_name(), err),
            }
        }

        let blocks = format_reply(&reply.text, &image_urls);
        self.client
            .post_message(channel, &reply.text, &blocks, thread_ts)?;
        Ok(())
    }

    fn greet(&self, event: &SlackEvent) -> Result<(), AdapterError> {
        let bot_user = self.bot_user_id()?;
        if event.user.as_deref() != Some(bot_user) {
            return Ok(());
        }
        let channel = event
            .channel
            .as_deref()
            .ok_or_else(|| AdapterError::ParseError("event has no channel".to_string()))?;
        info!("joined {}", channel);
        self.client.post_message(channel, GREETING, &[], None)?;
        Ok(())
    }

    fn bot_user_id(&self) -> Result<&str, AdapterError> {
        if let Some(id) = self.bot_user_id.get() {
            return Ok(id.as_str());
        }
        let id = self.client.auth_test()?;
        Ok(self.bot_user_id.get_or_init(|| id).as_str())
    }

    /// Email if the profile exposes one, otherwise the Slack user id.
    fn sender(&self, user: &str) -> String {
        match self.client.user_email(user) {
            Ok(Some(email)) => email,
            Ok(None) => user.to_string(),
            Err(err) => {
                warn!("users.info failed for {}: {}", user, err);
                user.to_string()
            }
        }
    }

    fn download_files(&self, event: &SlackEvent) -> Vec<File> {
        let fetcher = self.client.file_fetcher();
        event
            .files
            .iter()
            .filter_map(|slack_file| {
                let mut file = slack_file.to_file();
                match file.ensure_content(&fetcher) {
                    Ok(_) => Some(file),
                    Err(err) => {
                        warn!("{}", err);
                        None
                    }
                }
            })
            .collect()
    }

    /// Host images publicly when possible; everything else is uploaded into
    /// the conversation. Returns the public URL for image blocks.
    fn publish(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        file: &mut File,
    ) -> Result<Option<String>, AdapterError> {
        if let Some(host) = self.image_host.as_ref().filter(|_| is_image(file)) {
            return host.upload(file).map(Some);
        }
        let id = self.client.upload_file(channel, thread_ts, file)?;
        info!("uploaded {} to {} as {}", file.display_name(), channel, id);
        Ok(None)
    }
}

/// Section with the reply text, then a divider and image block per hosted image.
pub fn format_reply(text: &str, image_urls: &[String]) -> Vec<Value> {
    let mut blocks = Vec::new();
    if !text.trim().is_empty() {
        blocks.push(json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": text}
        }));
    }
    for url in image_urls {
        blocks.push(json!({"type": "divider"}));
        blocks.push(json!({
            "type": "image",
            "image_url": url,
            "alt_text": "Generated image"
        }));
    }
    blocks
}
