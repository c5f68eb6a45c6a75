//! Gmail channel over the Gmail REST API.

pub mod client;
pub mod mime;
pub mod poller;

pub use client::GmailClient;
pub use mime::{build_reply, InboundEmail};
pub use poller::{start_gmail_poller_thread, GmailPoller};
