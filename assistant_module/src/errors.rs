use crate::types::RunStatus;

/// Errors raised while driving one assistant turn.
///
/// Every variant is recovered at the `MessageHandler` boundary and rendered
/// as an apology reply, so a failing turn never escapes into a channel
/// listener loop.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("could not start a conversation thread: {0}")]
    SessionCreationFailed(String),
    #[error("run {run_id} failed: {detail}")]
    RunFailed { run_id: String, detail: String },
    #[error("run {run_id} incomplete: {detail}")]
    RunIncomplete { run_id: String, detail: String },
    #[error("run {run_id} ended with status {status}")]
    RunCancelled { run_id: String, status: RunStatus },
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),
    #[error("tool '{name}' failed: {detail}")]
    ToolExecution { name: String, detail: String },
    #[error("attachment download failed for {name}: {detail}")]
    AttachmentDownload { name: String, detail: String },
    #[error("run {run_id} did not finish within {secs}s")]
    Timeout { run_id: String, secs: u64 },
    #[error("turn cancelled while waiting on run {run_id}")]
    Cancelled { run_id: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("assistant api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AssistantError {
    /// True when the error came from talking to the API rather than from the
    /// run reaching a terminal state, so the remote run may still be active.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AssistantError::Http(_) | AssistantError::Api { .. } | AssistantError::Json(_)
        )
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        AssistantError::Http(err.to_string())
    }
}

/// Errors raised by tool registration and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("invalid arguments for '{name}': {detail}")]
    InvalidArguments { name: String, detail: String },
    #[error("{0}")]
    Execution(String),
}

impl From<AssistantError> for ToolError {
    fn from(err: AssistantError) -> Self {
        ToolError::Execution(err.to_string())
    }
}
