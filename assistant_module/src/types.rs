use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AssistantError;

/// Identity of one end user's conversation, e.g. `slack:dave@example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where the bytes of a [`File`] currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Only a reference (id or url) is known; bytes must be fetched.
    Remote,
    /// Bytes are held locally and no reference exists.
    Local,
    /// Both a reference and the bytes are known.
    Both,
    /// Neither bytes nor a reference.
    Empty,
}

/// An attachment travelling in or out of a turn.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub filetype: Option<String>,
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("name", &self.name)
            .field("filetype", &self.filetype)
            .field("content_len", &self.content.as_ref().map(Vec::len))
            .finish()
    }
}

/// Fetches the bytes behind a remote file reference.
///
/// Each platform brings its own implementation because downloads need
/// platform credentials (a Slack bot token, a Gmail access token, ...).
pub trait FileFetcher: Send + Sync {
    fn fetch(&self, file: &File) -> Result<Vec<u8>, AssistantError>;
}

impl File {
    pub fn local(name: impl Into<String>, filetype: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            filetype: Some(filetype.into()),
            content: Some(content),
            ..Default::default()
        }
    }

    /// A file already stored with the assistant API.
    pub fn stored(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn remote_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn state(&self) -> FileState {
        let has_reference = self.id.is_some() || self.url.is_some();
        match (has_reference, self.content.is_some()) {
            (true, true) => FileState::Both,
            (true, false) => FileState::Remote,
            (false, true) => FileState::Local,
            (false, false) => FileState::Empty,
        }
    }

    /// Best display name: explicit name, then id, then a placeholder.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("attachment")
    }

    /// Make sure the bytes are held locally, downloading them if only a
    /// reference is known.
    pub fn ensure_content(&mut self, fetcher: &dyn FileFetcher) -> Result<&[u8], AssistantError> {
        match self.state() {
            FileState::Local | FileState::Both => {}
            FileState::Remote => {
                let bytes = fetcher.fetch(self)?;
                self.content = Some(bytes);
            }
            FileState::Empty => {
                return Err(AssistantError::AttachmentDownload {
                    name: self.display_name().to_string(),
                    detail: "file has neither content nor a reference".to_string(),
                });
            }
        }
        Ok(self.content.as_deref().unwrap_or_default())
    }
}

/// Fetches files by their `url` with an optional bearer token.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    client: reqwest::blocking::Client,
    bearer_token: Option<String>,
}

impl HttpFileFetcher {
    pub fn new(bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            bearer_token,
        }
    }
}

impl FileFetcher for HttpFileFetcher {
    fn fetch(&self, file: &File) -> Result<Vec<u8>, AssistantError> {
        let url = file
            .url
            .as_deref()
            .ok_or_else(|| AssistantError::AttachmentDownload {
                name: file.display_name().to_string(),
                detail: "file has no url".to_string(),
            })?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request
            .send()
            .map_err(|e| AssistantError::AttachmentDownload {
                name: file.display_name().to_string(),
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AssistantError::AttachmentDownload {
                name: file.display_name().to_string(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|e| AssistantError::AttachmentDownload {
                name: file.display_name().to_string(),
                detail: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

/// One inbound user message, consumed by exactly one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub files: Vec<File>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<File>) -> Self {
        self.files = files;
        self
    }
}

/// The outcome of a turn: reply text plus any generated attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub attachments: Vec<File>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled
                | RunStatus::Failed
                | RunStatus::Completed
                | RunStatus::Incomplete
                | RunStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote run as reported by the assistant API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

impl Run {
    /// Tool calls requested by a `requires_action` run, if any.
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .filter(|action| action.kind == "submit_tool_outputs")
            .and_then(|action| action.submit_tool_outputs.as_ref())
            .map(|outputs| outputs.tool_calls.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// A request from the remote run to execute a named local function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Arguments as a JSON value; an empty string is an empty object.
    pub fn arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&self.function.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message stored on a remote thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<MessageContent>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    ImageFile { image_file: ImageFileContent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFileContent {
    pub file_id: String,
}

/// Remote assistant definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Parameters for creating a remote assistant.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<serde_json::Value>,
}

/// A file stored with the assistant API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub purpose: String,
}
