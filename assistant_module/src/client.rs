//! Client for the remote LLM assistant API.
//!
//! The run driver only talks to the [`AssistantsApi`] trait; the production
//! implementation is [`OpenAiAssistantsClient`], a blocking client for the
//! OpenAI Assistants v2 REST API.
//!
//! Configuration:
//! - `OPENAI_API_KEY`: API key (required)
//! - `OPENAI_API_URL`: API base URL (default: `https://api.openai.com/v1`)

use std::env;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AssistantError;
use crate::types::{
    Assistant, AssistantSpec, File, RemoteFile, Run, ThreadMessage, ToolOutput,
};

/// Default OpenAI API URL
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Timeout for a single HTTP request (not for a whole run)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Page size used when listing thread messages
const MESSAGE_PAGE_LIMIT: u32 = 100;

/// Operations of the remote assistant API consumed by the core.
pub trait AssistantsApi: Send + Sync {
    fn create_thread(&self) -> Result<String, AssistantError>;
    /// Append a user message; `file_ids` are attached for the code interpreter.
    fn add_message(
        &self,
        thread_id: &str,
        text: &str,
        file_ids: &[String],
    ) -> Result<String, AssistantError>;
    fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError>;
    fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;
    fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AssistantError>;
    fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;
    /// Messages of a thread, newest first.
    fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError>;
    fn file_content(&self, file_id: &str) -> Result<Vec<u8>, AssistantError>;
    /// Upload local bytes with purpose `assistants`; returns the file id.
    fn upload_file(&self, file: &File) -> Result<String, AssistantError>;

    fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, AssistantError>;
    fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, AssistantError>;
    fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError>;
    fn delete_assistant(&self, assistant_id: &str) -> Result<(), AssistantError>;
    fn list_files(&self, purpose: &str) -> Result<Vec<RemoteFile>, AssistantError>;
    fn delete_file(&self, file_id: &str) -> Result<(), AssistantError>;
}

/// Configuration for [`OpenAiAssistantsClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_URL.to_string(),
        }
    }

    /// Load from `OPENAI_API_KEY` / `OPENAI_API_URL`.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        Some(Self {
            api_key,
            base_url: env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Blocking client for the OpenAI Assistants v2 API.
#[derive(Debug, Clone)]
pub struct OpenAiAssistantsClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiAssistantsClient {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AssistantError> {
        debug!("GET {}", path);
        let response = self.authorized(self.client.get(self.url(path))).send()?;
        parse_json(response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AssistantError> {
        debug!("POST {}", path);
        let response = self
            .authorized(self.client.post(self.url(path)))
            .json(body)
            .send()?;
        parse_json(response)
    }

    fn delete(&self, path: &str) -> Result<(), AssistantError> {
        debug!("DELETE {}", path);
        let response = self.authorized(self.client.delete(self.url(path))).send()?;
        let _: DeletedResponse = parse_json(response)?;
        Ok(())
    }
}

fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, AssistantError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(AssistantError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let body = response.text()?;
    Ok(serde_json::from_str(&body)?)
}

impl AssistantsApi for OpenAiAssistantsClient {
    fn create_thread(&self) -> Result<String, AssistantError> {
        let thread: IdResponse = self.post("threads", &serde_json::json!({}))?;
        Ok(thread.id)
    }

    fn add_message(
        &self,
        thread_id: &str,
        text: &str,
        file_ids: &[String],
    ) -> Result<String, AssistantError> {
        let request = CreateMessageRequest {
            role: "user",
            content: text,
            attachments: file_ids
                .iter()
                .map(|file_id| MessageAttachment {
                    file_id: file_id.clone(),
                    tools: vec![ToolType {
                        kind: "code_interpreter",
                    }],
                })
                .collect(),
        };
        let message: IdResponse = self.post(&format!("threads/{}/messages", thread_id), &request)?;
        Ok(message.id)
    }

    fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        self.post(
            &format!("threads/{}/runs", thread_id),
            &serde_json::json!({ "assistant_id": assistant_id }),
        )
    }

    fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.get(&format!("threads/{}/runs/{}", thread_id, run_id))
    }

    fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AssistantError> {
        self.post(
            &format!("threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            &serde_json::json!({ "tool_outputs": outputs }),
        )
    }

    fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.post(
            &format!("threads/{}/runs/{}/cancel", thread_id, run_id),
            &serde_json::json!({}),
        )
    }

    fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let page: ListResponse<ThreadMessage> = self.get(&format!(
            "threads/{}/messages?order=desc&limit={}",
            thread_id, MESSAGE_PAGE_LIMIT
        ))?;
        Ok(page.data)
    }

    fn file_content(&self, file_id: &str) -> Result<Vec<u8>, AssistantError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("files/{}/content", file_id))))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Api {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    fn upload_file(&self, file: &File) -> Result<String, AssistantError> {
        let content = file
            .content
            .clone()
            .ok_or_else(|| AssistantError::AttachmentDownload {
                name: file.display_name().to_string(),
                detail: "no local content to upload".to_string(),
            })?;
        let part = multipart::Part::bytes(content).file_name(file.display_name().to_string());
        let form = multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let response = self
            .authorized(self.client.post(self.url("files")))
            .multipart(form)
            .send()?;
        let uploaded: IdResponse = parse_json(response)?;
        Ok(uploaded.id)
    }

    fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, AssistantError> {
        self.post("assistants", spec)
    }

    fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, AssistantError> {
        self.get(&format!("assistants/{}", assistant_id))
    }

    fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError> {
        let page: ListResponse<Assistant> = self.get("assistants?limit=100")?;
        Ok(page.data)
    }

    fn delete_assistant(&self, assistant_id: &str) -> Result<(), AssistantError> {
        self.delete(&format!("assistants/{}", assistant_id))
    }

    fn list_files(&self, purpose: &str) -> Result<Vec<RemoteFile>, AssistantError> {
        let page: ListResponse<RemoteFile> =
            self.get(&format!("files?purpose={}", purpose))?;
        Ok(page.data)
    }

    fn delete_file(&self, file_id: &str) -> Result<(), AssistantError> {
        self.delete(&format!("files/{}", file_id))
    }
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeletedResponse {
    #[allow(dead_code)]
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<MessageAttachment>,
}

#[derive(Debug, Serialize)]
struct MessageAttachment {
    file_id: String,
    tools: Vec<ToolType>,
}

#[derive(Debug, Serialize)]
struct ToolType {
    #[serde(rename = "type")]
    kind: &'static str,
}
