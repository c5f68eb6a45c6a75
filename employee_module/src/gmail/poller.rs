//! Inbox polling: every unread message becomes a turn answered in-thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use assistant_module::agent::MessageHandler;
use assistant_module::types::{File, Message};
use tracing::{error, info, warn};

use crate::channel::{AdapterError, Channel, SessionScope};
use crate::service::workers::sleep_unless_stopped;

use super::client::GmailClient;
use super::mime::{build_reply, InboundEmail};

pub struct GmailPoller {
    client: GmailClient,
    handler: Arc<dyn MessageHandler>,
    scope: SessionScope,
    interval: Duration,
    /// Messages whose turn already ran (or that can never run). They are only
    /// marked read again, never answered twice.
    settled: Mutex<HashSet<String>>,
}

impl GmailPoller {
    pub fn new(
        client: GmailClient,
        handler: Arc<dyn MessageHandler>,
        scope: SessionScope,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            handler,
            scope,
            interval,
            settled: Mutex::new(HashSet::new()),
        }
    }

    /// One pass over the unread inbox; returns how many messages were answered.
    pub fn poll_once(&self) -> Result<usize, AdapterError> {
        let mut answered = 0;
        for id in self.client.list_unread()? {
            if self.is_settled(&id) {
                self.mark_read_quietly(&id);
                continue;
            }
            match self.process(&id) {
                Ok(true) => answered += 1,
                Ok(false) => {}
                // Nothing reached the handler yet, so the next pass retries it.
                Err(err) => error!("gmail message {} failed, left unread: {}", id, err),
            }
        }
        Ok(answered)
    }

    /// Returns whether a reply was sent. Errors are only returned before the
    /// turn runs.
    fn process(&self, id: &str) -> Result<bool, AdapterError> {
        let message = self.client.get_message(id)?;
        let email = match InboundEmail::from_message(&message) {
            Ok(email) => email,
            Err(err) => {
                warn!("skipping gmail message {}: {}", id, err);
                self.settle(id);
                self.mark_read_quietly(id);
                return Ok(false);
            }
        };
        info!(
            "processing email {} from {} with subject: {}",
            email.id, email.from, email.subject
        );

        let fetcher = self.client.attachment_fetcher(&email.id);
        let files: Vec<File> = email
            .attachments
            .iter()
            .cloned()
            .filter_map(|mut file| match file.ensure_content(&fetcher) {
                Ok(_) => Some(file),
                Err(err) => {
                    warn!("{}", err);
                    None
                }
            })
            .collect();

        let key = self.scope.key(Channel::Gmail, &email.from);
        let reply = self
            .handler
            .handle_message(&key, Message::new(email.prompt()).with_files(files));
        self.settle(id);

        let raw = build_reply(&email, &reply.text, &reply.attachments);
        let sent = match self.client.send_raw(&raw, Some(&email.thread_id)) {
            Ok(sent) => {
                info!("replied to {} as {}", email.id, sent);
                true
            }
            Err(err) => {
                error!("reply to gmail message {} was not sent: {}", email.id, err);
                false
            }
        };
        self.mark_read_quietly(id);
        Ok(sent)
    }

    fn is_settled(&self, id: &str) -> bool {
        self.settled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    fn settle(&self, id: &str) {
        self.settled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    fn mark_read_quietly(&self, id: &str) {
        if let Err(err) = self.client.mark_read(id) {
            warn!("could not mark gmail message {} read: {}", id, err);
        }
    }

    pub fn run_loop(&self, stop_flag: &AtomicBool) {
        info!(
            "starting gmail poller with {}s interval",
            self.interval.as_secs()
        );
        while !stop_flag.load(Ordering::Relaxed) {
            match self.poll_once() {
                Ok(count) if count > 0 => info!("gmail poll answered {} message(s)", count),
                Ok(_) => {}
                Err(err) => error!("gmail poll error: {}", err),
            }
            sleep_unless_stopped(self.interval, stop_flag);
        }
        info!("gmail poller stopped");
    }
}

pub fn start_gmail_poller_thread(
    poller: GmailPoller,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || poller.run_loop(&stop_flag))
}
