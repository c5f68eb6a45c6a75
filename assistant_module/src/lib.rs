//! Conversation core for the digital employee: sessions, the remote run
//! driver, local tools and the message handler interface.

pub mod agent;
pub mod client;
pub mod delegate;
pub mod errors;
pub mod run;
pub mod session;
pub mod tools;
pub mod types;

pub use agent::{apology, ensure_assistant, AgentProfile, AssistantAgent, MessageHandler};
pub use client::{AssistantsApi, OpenAiAssistantsClient, OpenAiConfig};
pub use delegate::ChatWithAgentTool;
pub use errors::{AssistantError, ToolError};
pub use run::{CancellationToken, RunDriver, RunDriverConfig, UnknownToolPolicy};
pub use session::SessionStore;
pub use tools::{Tool, ToolContext, ToolDefinition, ToolRegistry};
pub use types::{ConversationKey, File, FileFetcher, FileState, HttpFileFetcher, Message, Reply};
