use std::env;

use assistant_module::errors::AssistantError;
use assistant_module::types::{File, FileFetcher};
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::channel::AdapterError;
use crate::google_auth::GoogleAuth;

use super::mime::{GmailMessage, URL_SAFE_LENIENT};

pub const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com/gmail/v1";

pub const UNREAD_QUERY: &str = "is:unread in:inbox";

/// Gmail REST client for the authenticated mailbox (`users/me`).
#[derive(Debug, Clone)]
pub struct GmailClient {
    auth: GoogleAuth,
    api_base: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl GmailClient {
    pub fn new(auth: GoogleAuth) -> Self {
        Self {
            auth,
            api_base: env::var("GMAIL_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GMAIL_API_URL.to_string()),
            client: Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, AdapterError> {
        let token = self
            .auth
            .get_access_token()
            .map_err(|e| AdapterError::ConfigError(e.to_string()))?;
        Ok(request.bearer_auth(token))
    }

    /// Ids of unread inbox messages, following pagination.
    pub fn list_unread(&self) -> Result<Vec<String>, AdapterError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("q", UNREAD_QUERY.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let request = self.client.get(self.url("messages")).query(&query);
            let list: MessageList = check(self.authorized(request)?.send()?)?.json()?;
            ids.extend(list.messages.into_iter().map(|message| message.id));
            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!("gmail has {} unread message(s)", ids.len());
        Ok(ids)
    }

    pub fn get_message(&self, id: &str) -> Result<GmailMessage, AdapterError> {
        let request = self
            .client
            .get(self.url(&format!("messages/{}", id)))
            .query(&[("format", "full")]);
        Ok(check(self.authorized(request)?.send()?)?.json()?)
    }

    pub fn attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, AdapterError> {
        let request = self.client.get(self.url(&format!(
            "messages/{}/attachments/{}",
            message_id, attachment_id
        )));
        let body: AttachmentBody = check(self.authorized(request)?.send()?)?.json()?;
        URL_SAFE_LENIENT
            .decode(body.data)
            .map_err(|e| AdapterError::ParseError(format!("attachment {}: {}", attachment_id, e)))
    }

    /// Send an RFC 2822 message into `thread_id`; returns the new message id.
    pub fn send_raw(&self, raw: &str, thread_id: Option<&str>) -> Result<String, AdapterError> {
        let mut body = json!({
            "raw": base64::engine::general_purpose::URL_SAFE.encode(raw.as_bytes())
        });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }
        let request = self.client.post(self.url("messages/send")).json(&body);
        let sent: SentMessage = check(self.authorized(request)?.send()?)?.json()?;
        Ok(sent.id)
    }

    pub fn mark_read(&self, id: &str) -> Result<(), AdapterError> {
        let request = self
            .client
            .post(self.url(&format!("messages/{}/modify", id)))
            .json(&json!({"removeLabelIds": ["UNREAD"]}));
        check(self.authorized(request)?.send()?)?;
        Ok(())
    }

    pub fn attachment_fetcher(&self, message_id: &str) -> GmailAttachmentFetcher {
        GmailAttachmentFetcher {
            client: self.clone(),
            message_id: message_id.to_string(),
        }
    }
}

fn check(response: Response) -> Result<Response, AdapterError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(AdapterError::SendError(format!(
        "gmail returned {}: {}",
        status, body
    )))
}

/// Downloads attachments of one message; the file's `id` is the attachment id.
pub struct GmailAttachmentFetcher {
    client: GmailClient,
    message_id: String,
}

impl FileFetcher for GmailAttachmentFetcher {
    fn fetch(&self, file: &File) -> Result<Vec<u8>, AssistantError> {
        let attachment_err = |detail: String| AssistantError::AttachmentDownload {
            name: file.display_name().to_string(),
            detail,
        };
        let attachment_id = file
            .id
            .as_deref()
            .ok_or_else(|| attachment_err("no attachment id".to_string()))?;
        self.client
            .attachment(&self.message_id, attachment_id)
            .map_err(|e| attachment_err(e.to_string()))
    }
}
