//! Notion channel: comment polling plus page tools for the assistant.

pub mod client;
pub mod poller;
pub mod tools;

pub use client::{NotionClient, NotionError};
pub use poller::{start_notion_threads, NotionPoller, NotionResponder, PendingComment};
pub use tools::{CreatePageTool, UpdateBlockTool};
