use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::agent::MessageHandler;
use crate::errors::ToolError;
use crate::tools::{Tool, ToolContext, ToolDefinition};
use crate::types::{File, Message};

pub const CHAT_WITH_AGENT: &str = "chat_with_agent";

/// Forwards a sub-task to a specialist handler and relays its answer.
pub struct ChatWithAgentTool {
    specialist: Arc<dyn MessageHandler>,
}

impl ChatWithAgentTool {
    pub fn new(specialist: Arc<dyn MessageHandler>) -> Self {
        Self { specialist }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatWithAgentArgs {
    pub text: String,
    #[serde(default)]
    pub files: Vec<InlineFile>,
    /// Ids of files already uploaded with the user's message.
    #[serde(default)]
    pub file_ids: Vec<String>,
}

/// A text file written inline by the calling assistant.
#[derive(Debug, Deserialize)]
pub struct InlineFile {
    pub name: String,
    pub filetype: String,
    pub content: String,
}

impl Tool for ChatWithAgentTool {
    type Args = ChatWithAgentArgs;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: CHAT_WITH_AGENT.to_string(),
            description: format!(
                "Delegate a task to {} by providing a description. Forward their analysis to the user verbatim. Any files created by {} will be attached to your response automatically.",
                self.specialist.name(),
                self.specialist.name()
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text of the message."
                    },
                    "file_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "IDs of files the user uploaded that the agent needs."
                    },
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string", "description": "The name of the file."},
                                "filetype": {"type": "string", "description": "The filetype of the file."},
                                "content": {"type": "string", "description": "The content of the file."}
                            },
                            "required": ["name", "filetype", "content"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["text"]
            }),
        }
    }

    fn call(&self, args: ChatWithAgentArgs, ctx: &mut ToolContext) -> Result<String, ToolError> {
        if !args.file_ids.is_empty() {
            info!(
                "sending files {:?} to {}",
                args.file_ids,
                self.specialist.name()
            );
        }
        let files = args
            .file_ids
            .into_iter()
            .map(File::stored)
            .chain(
                args.files
                    .into_iter()
                    .map(|f| File::local(f.name, f.filetype, f.content.into_bytes())),
            )
            .collect();
        let message = Message::new(args.text).with_files(files);

        let reply = self.specialist.handle_message(ctx.key(), message);
        let names: Vec<String> = reply
            .attachments
            .iter()
            .map(|file| file.display_name().to_string())
            .collect();
        info!(
            "{} returned {} attachments: {:?}",
            self.specialist.name(),
            names.len(),
            names
        );

        let mut output = format!(
            "<log start> {} Analysis: <log end>\n\n{}",
            self.specialist.name(),
            reply.text
        );
        if !names.is_empty() {
            output.push_str(&format!(
                "\n<log start> Received the following files from {}: {:?} <log end>",
                self.specialist.name(),
                names
            ));
        }
        for file in reply.attachments {
            ctx.attach(file);
        }
        Ok(output)
    }
}
