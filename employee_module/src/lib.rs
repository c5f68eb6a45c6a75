//! Platform side of the digital employee: Slack, Gmail and Notion channels,
//! the markdown block renderer, Notion tools and the HTTP service.

pub mod agents_config;
pub mod blocks;
pub mod channel;
pub mod gmail;
pub mod google_auth;
pub mod image_host;
pub mod notion;
pub mod service;
pub mod slack;

pub use agents_config::{load_agents_config, AgentsConfig};
pub use channel::{AdapterError, Channel, SessionScope};
