//! Slack channel: Events API webhook payloads, signature checks, the Web API
//! client and the bot that ties them to a message handler.

pub mod bot;
pub mod client;
pub mod events;
pub mod verify;

pub use bot::{format_reply, SlackBot};
pub use client::SlackClient;
pub use events::{EventAction, SlackEnvelope, SlackEvent, SlashCommand};
pub use verify::verify_slack_request;
