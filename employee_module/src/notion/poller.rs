//! Comment polling: comments that mention the agent become turns, and the
//! reply is posted into the comment's discussion.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use assistant_module::agent::MessageHandler;
use assistant_module::types::Message;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::blocks::{render_runs, TextRun};
use crate::channel::{Channel, SessionScope};
use crate::image_host::{is_image, ImageHost};
use crate::service::workers::sleep_unless_stopped;

use super::client::{block_text, Comment, NotionClient, NotionError};

/// A comment that asked the agent for something, with the context needed to
/// answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComment {
    pub page_id: String,
    pub comment_id: String,
    pub discussion_id: String,
    pub block_id: Option<String>,
    pub sender_email: String,
    pub content: String,
    pub context_block: String,
    pub context_page: String,
}

impl PendingComment {
    pub fn prompt(&self) -> String {
        format!(
            "Please address this comment on the Notion page {page}. To address the comment, update the relevant portions of the page and reply with a brief summary of the resolution (1-3 sentences). Below is relevant context followed by the user's comment.\n<START CONTEXT>\n\nPage context: {context}\nBlock ID: {block}\nBlock text: {block_text}\n<END CONTEXT>\nComment from {sender}: {content}",
            page = self.page_id,
            context = self.context_page,
            block = self.block_id.as_deref().unwrap_or("(page)"),
            block_text = self.context_block,
            sender = self.sender_email,
            content = self.content,
        )
    }
}

/// Text following the first mention of `agent_name`, if any.
pub fn actionable_text(comment: &Comment, agent_name: &str) -> Option<String> {
    let mut mentioned = false;
    for item in &comment.rich_text {
        if item.kind == "mention" {
            if item
                .mentioned_user()
                .is_some_and(|name| name.eq_ignore_ascii_case(agent_name))
            {
                mentioned = true;
            }
        } else if mentioned {
            return Some(item.content().trim().to_string());
        }
    }
    None
}

pub struct NotionPoller {
    client: NotionClient,
    agent_name: String,
    processed: Mutex<HashSet<String>>,
}

impl NotionPoller {
    pub fn new(client: NotionClient, agent_name: impl Into<String>) -> Self {
        Self {
            client,
            agent_name: agent_name.into(),
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Scan every page once and return the comments not seen before.
    pub fn poll_once(&self) -> Result<Vec<PendingComment>, NotionError> {
        let mut pending = Vec::new();
        for page in self.client.search_pages()? {
            let comments = self.page_comments(&page.id);
            let mut page_text: Option<String> = None;
            let mut block_texts: HashMap<String, String> = HashMap::new();

            for comment in comments {
                if self.is_processed(&comment.id) {
                    continue;
                }
                let Some(content) = actionable_text(&comment, &self.agent_name) else {
                    continue;
                };

                let context_page = match &page_text {
                    Some(text) => text.clone(),
                    None => {
                        let text = self.client.page_text(&page.id).unwrap_or_else(|err| {
                            warn!("could not read page {}: {}", page.id, err);
                            String::new()
                        });
                        page_text = Some(text.clone());
                        text
                    }
                };
                let block_id = comment
                    .parent
                    .block_id
                    .clone()
                    .filter(|_| comment.parent.kind == "block_id");
                let context_block = match &block_id {
                    Some(id) => block_texts
                        .entry(id.clone())
                        .or_insert_with(|| {
                            self.client
                                .retrieve_block(id)
                                .map(|block| block_text(&block))
                                .unwrap_or_default()
                        })
                        .clone(),
                    None => String::new(),
                };

                let sender_email = self.sender_email(&comment.created_by.id);
                self.mark_processed(&comment.id);
                info!(
                    "new notion comment {} from {} on page {}",
                    comment.id, sender_email, page.id
                );
                pending.push(PendingComment {
                    page_id: page.id.clone(),
                    comment_id: comment.id,
                    discussion_id: comment.discussion_id,
                    block_id,
                    sender_email,
                    content,
                    context_block,
                    context_page,
                });
            }
        }
        Ok(pending)
    }

    /// Top-level comments followed by inline comments on each child block.
    fn page_comments(&self, page_id: &str) -> Vec<Comment> {
        let mut comments = self.client.list_comments(page_id).unwrap_or_else(|err| {
            warn!("could not list comments on {}: {}", page_id, err);
            Vec::new()
        });
        let blocks = self.client.block_children(page_id).unwrap_or_else(|err| {
            warn!("could not list blocks of {}: {}", page_id, err);
            Vec::new()
        });
        for block in blocks {
            let Some(block_id) = block["id"].as_str() else {
                continue;
            };
            match self.client.list_comments(block_id) {
                Ok(found) => comments.extend(found),
                Err(err) => debug!("no comments for block {}: {}", block_id, err),
            }
        }
        comments
    }

    fn sender_email(&self, user_id: &str) -> String {
        match self.client.retrieve_user(user_id) {
            Ok(user) => user
                .person
                .and_then(|person| person.email)
                .unwrap_or_else(|| user_id.to_string()),
            Err(err) => {
                warn!("could not look up notion user {}: {}", user_id, err);
                user_id.to_string()
            }
        }
    }

    fn is_processed(&self, comment_id: &str) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(comment_id)
    }

    fn mark_processed(&self, comment_id: &str) {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(comment_id.to_string());
    }

    pub fn run_loop(&self, queue: &Sender<PendingComment>, interval: Duration, stop_flag: &AtomicBool) {
        info!(
            "starting notion poller for {} with {}s interval",
            self.agent_name,
            interval.as_secs()
        );
        while !stop_flag.load(Ordering::Relaxed) {
            match self.poll_once() {
                Ok(found) => {
                    for comment in found {
                        if queue.send(comment).is_err() {
                            warn!("notion responder is gone; stopping poller");
                            return;
                        }
                    }
                }
                Err(err) => error!("notion poll error: {}", err),
            }
            sleep_unless_stopped(interval, stop_flag);
        }
        info!("notion poller stopped");
    }
}

/// Runs a turn per pending comment and replies in its discussion.
pub struct NotionResponder {
    client: NotionClient,
    handler: Arc<dyn MessageHandler>,
    scope: SessionScope,
    image_host: Option<Arc<dyn ImageHost>>,
}

impl NotionResponder {
    pub fn new(client: NotionClient, handler: Arc<dyn MessageHandler>, scope: SessionScope) -> Self {
        Self {
            client,
            handler,
            scope,
            image_host: None,
        }
    }

    pub fn with_image_host(mut self, host: Arc<dyn ImageHost>) -> Self {
        self.image_host = Some(host);
        self
    }

    /// Returns the id of the posted reply.
    pub fn respond(&self, pending: &PendingComment) -> Result<String, NotionError> {
        info!(
            "processing notion comment {} from {} on page {}",
            pending.comment_id, pending.sender_email, pending.page_id
        );
        let key = self.scope.key(Channel::Notion, &pending.sender_email);
        let reply = self.handler.handle_message(&key, Message::new(pending.prompt()));

        let mut runs =
            render_runs(&reply.text).unwrap_or_else(|_| vec![TextRun::plain(reply.text.clone())]);
        for mut file in reply.attachments {
            let url = match (&self.image_host, is_image(&file)) {
                (Some(host), true) => match host.upload(&mut file) {
                    Ok(url) => url,
                    Err(err) => {
                        warn!("could not host {}: {}", file.display_name(), err);
                        continue;
                    }
                },
                _ => match file.url.clone() {
                    Some(url) => url,
                    None => {
                        warn!("dropping {}: comments cannot carry files", file.display_name());
                        continue;
                    }
                },
            };
            runs.push(TextRun::plain("\n"));
            runs.push(TextRun {
                link: Some(url),
                ..TextRun::plain(file.display_name())
            });
        }
        if runs.is_empty() {
            runs.push(TextRun::plain(reply.text));
        }

        let id = self.client.create_comment(&pending.discussion_id, &runs)?;
        info!("replied to notion comment {} with {}", pending.comment_id, id);
        Ok(id)
    }

    pub fn run_loop(&self, queue: &Receiver<PendingComment>, stop_flag: &AtomicBool) {
        while !stop_flag.load(Ordering::Relaxed) {
            match queue.recv_timeout(Duration::from_millis(500)) {
                Ok(pending) => {
                    // The poller already marked it processed; it is not retried.
                    if let Err(err) = self.respond(&pending) {
                        warn!(
                            "dropping notion comment {} in discussion {}: {}",
                            pending.comment_id, pending.discussion_id, err
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("notion responder stopped");
    }
}

/// Poller and responder threads joined by an unbounded queue.
pub fn start_notion_threads(
    poller: NotionPoller,
    responder: NotionResponder,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    let (sender, receiver) = unbounded::<PendingComment>();
    let poll_stop = stop_flag.clone();
    let poll_handle = std::thread::spawn(move || poller.run_loop(&sender, interval, &poll_stop));
    let respond_handle = std::thread::spawn(move || responder.run_loop(&receiver, &stop_flag));
    vec![poll_handle, respond_handle]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(rich_text: serde_json::Value) -> Comment {
        serde_json::from_value(json!({
            "id": "c1",
            "discussion_id": "d1",
            "parent": {"type": "block_id", "block_id": "b1"},
            "created_by": {"id": "u1", "object": "user"},
            "rich_text": rich_text
        }))
        .unwrap()
    }

    #[test]
    fn text_after_agent_mention_is_actionable() {
        let c = comment(json!([
            {"type": "mention", "mention": {"type": "user", "user": {"id": "bot", "name": "Employee"}}, "plain_text": "@Employee"},
            {"type": "text", "text": {"content": " tighten this paragraph "}, "plain_text": " tighten this paragraph "}
        ]));
        assert_eq!(
            actionable_text(&c, "Employee").as_deref(),
            Some("tighten this paragraph")
        );
        assert_eq!(actionable_text(&c, "AI Analyst"), None);
    }

    #[test]
    fn comments_without_mentions_are_ignored() {
        let c = comment(json!([
            {"type": "text", "text": {"content": "Employee should look at this"}}
        ]));
        assert_eq!(actionable_text(&c, "Employee"), None);
    }

    #[test]
    fn prompt_carries_context_and_sender() {
        let pending = PendingComment {
            page_id: "p1".to_string(),
            comment_id: "c1".to_string(),
            discussion_id: "d1".to_string(),
            block_id: Some("b1".to_string()),
            sender_email: "dana@example.com".to_string(),
            content: "fix the typo".to_string(),
            context_block: "Teh plan".to_string(),
            context_page: "Roadmap\n\nBlock ID: b1\nTeh plan".to_string(),
        };
        let prompt = pending.prompt();
        assert!(prompt.starts_with("Please address this comment on the Notion page p1."));
        assert!(prompt.contains("Block ID: b1\nBlock text: Teh plan\n<END CONTEXT>"));
        assert!(prompt.ends_with("Comment from dana@example.com: fix the typo"));
    }
}
