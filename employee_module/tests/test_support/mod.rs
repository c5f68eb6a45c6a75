#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use assistant_module::agent::MessageHandler;
use assistant_module::types::{ConversationKey, File, Message, Reply};

/// Message handler that answers with a fixed reply and remembers every turn.
pub struct RecordingHandler {
    name: String,
    reply_text: Option<String>,
    attachments: Vec<File>,
    reset_delay: Option<Duration>,
    pub turns: Mutex<Vec<(String, Message)>>,
    pub resets: Mutex<Vec<String>>,
}

impl RecordingHandler {
    /// Echoes the incoming text back as `echo: <text>`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply_text: None,
            attachments: Vec::new(),
            reset_delay: None,
            turns: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(mut self, text: &str) -> Self {
        self.reply_text = Some(text.to_string());
        self
    }

    pub fn with_attachment(mut self, file: File) -> Self {
        self.attachments.push(file);
        self
    }

    /// Resets take `delay`, like waiting on a turn still in flight.
    pub fn with_slow_reset(mut self, delay: Duration) -> Self {
        self.reset_delay = Some(delay);
        self
    }

    pub fn turn_keys(&self) -> Vec<String> {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl MessageHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_message(&self, key: &ConversationKey, message: Message) -> Reply {
        let text = self
            .reply_text
            .clone()
            .unwrap_or_else(|| format!("echo: {}", message.text));
        self.turns.lock().unwrap().push((key.to_string(), message));
        Reply {
            text,
            attachments: self.attachments.clone(),
        }
    }

    fn reset_conversation(&self, key: &ConversationKey) {
        if let Some(delay) = self.reset_delay {
            std::thread::sleep(delay);
        }
        self.resets.lock().unwrap().push(key.to_string());
    }
}
