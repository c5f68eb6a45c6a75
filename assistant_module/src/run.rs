//! Drives one turn of a remote assistant run.
//!
//! A turn appends the user's message to the conversation thread, starts a run
//! and polls it until it reaches a terminal status. `requires_action` steps are
//! answered from the [`ToolRegistry`], all outputs of one step in one batch.
//! Polling is bounded by a deadline and can be aborted with a
//! [`CancellationToken`].

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::client::AssistantsApi;
use crate::errors::AssistantError;
use crate::session::{lock_slot, SessionStore};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{
    ConversationKey, File, HttpFileFetcher, Message, MessageContent, Reply, Role, Run, RunStatus,
    ThreadMessage, ToolOutput,
};

/// What to submit for a tool call naming an unregistered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownToolPolicy {
    /// Submit an error string so the run can continue.
    #[default]
    ErrorOutput,
    /// Submit nothing for the call.
    Skip,
}

impl FromStr for UnknownToolPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error_output" | "error" => Ok(Self::ErrorOutput),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown tool policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunDriverConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub unknown_tool_policy: UnknownToolPolicy,
}

impl Default for RunDriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
            unknown_tool_policy: UnknownToolPolicy::ErrorOutput,
        }
    }
}

/// Shared flag that aborts in-flight turns.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing stop flag, e.g. a worker shutdown flag.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct RunDriver {
    api: Arc<dyn AssistantsApi>,
    sessions: SessionStore,
    tools: Arc<ToolRegistry>,
    config: RunDriverConfig,
}

impl RunDriver {
    pub fn new(
        api: Arc<dyn AssistantsApi>,
        tools: Arc<ToolRegistry>,
        config: RunDriverConfig,
    ) -> Self {
        Self {
            api,
            sessions: SessionStore::new(),
            tools,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &RunDriverConfig {
        &self.config
    }

    /// Run one turn for `key` against `assistant_id`.
    ///
    /// Holds the key's session slot for the whole turn, so turns for the same
    /// key never interleave. Messages appended to the remote thread persist
    /// even when the turn fails afterwards.
    pub fn handle_message(
        &self,
        assistant_id: &str,
        key: &ConversationKey,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<Reply, AssistantError> {
        let slot = self.sessions.slot(key);
        let mut slot = lock_slot(&slot);
        let thread_id = slot.get_or_create(self.api.as_ref())?;

        let uploaded = self.upload_files(message.files);
        let text = with_upload_note(message.text, &uploaded);
        let file_ids: Vec<String> = uploaded.into_iter().map(|(_, id)| id).collect();
        self.api.add_message(&thread_id, &text, &file_ids)?;

        let run = self.api.create_run(&thread_id, assistant_id)?;
        let run_id = run.id.clone();
        info!(
            "run {} started on thread {} for {}",
            run_id, thread_id, key
        );

        let mut ctx = ToolContext::new(key.clone());
        if let Err(err) = self.poll_until_done(&thread_id, run, &mut ctx, cancel) {
            // An active run locks the thread against new messages.
            if err.is_transport() {
                self.cancel_quietly(&thread_id, &run_id);
            }
            return Err(err);
        }

        let mut reply = self.collect_reply(&thread_id)?;
        reply.attachments.extend(ctx.into_attachments());
        Ok(reply)
    }

    fn poll_until_done(
        &self,
        thread_id: &str,
        mut run: Run,
        ctx: &mut ToolContext,
        cancel: &CancellationToken,
    ) -> Result<(), AssistantError> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            debug!("run {} status {}", run.id, run.status);
            match run.status {
                RunStatus::Completed => return Ok(()),
                RunStatus::Failed => {
                    let detail = run
                        .last_error
                        .as_ref()
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "unknown error".to_string());
                    error!("run {} failed: {}", run.id, detail);
                    return Err(AssistantError::RunFailed {
                        run_id: run.id,
                        detail,
                    });
                }
                RunStatus::Incomplete => {
                    let detail = run
                        .incomplete_details
                        .as_ref()
                        .map(|d| d.reason.clone())
                        .unwrap_or_else(|| "unknown reason".to_string());
                    error!("run {} incomplete: {}", run.id, detail);
                    return Err(AssistantError::RunIncomplete {
                        run_id: run.id,
                        detail,
                    });
                }
                RunStatus::Cancelled | RunStatus::Expired => {
                    error!("run {} ended with status {}", run.id, run.status);
                    return Err(AssistantError::RunCancelled {
                        run_id: run.id,
                        status: run.status,
                    });
                }
                _ => {}
            }

            if cancel.is_cancelled() {
                self.cancel_quietly(thread_id, &run.id);
                return Err(AssistantError::Cancelled { run_id: run.id });
            }
            if Instant::now() >= deadline {
                self.cancel_quietly(thread_id, &run.id);
                return Err(AssistantError::Timeout {
                    run_id: run.id,
                    secs: self.config.timeout.as_secs(),
                });
            }

            run = if run.status == RunStatus::RequiresAction {
                let outputs = self.dispatch_tool_calls(&run, ctx);
                if outputs.is_empty() {
                    warn!("run {} requires action but has no outputs; cancelling", run.id);
                    self.api.cancel_run(thread_id, &run.id)?
                } else {
                    info!("submitting {} tool outputs to run {}", outputs.len(), run.id);
                    self.api.submit_tool_outputs(thread_id, &run.id, &outputs)?
                }
            } else {
                let remaining = deadline.saturating_duration_since(Instant::now());
                thread::sleep(self.config.poll_interval.min(remaining));
                self.api.retrieve_run(thread_id, &run.id)?
            };
        }
    }

    fn dispatch_tool_calls(&self, run: &Run, ctx: &mut ToolContext) -> Vec<ToolOutput> {
        let mut outputs = Vec::new();
        for call in run.pending_tool_calls() {
            let name = call.name();
            let args = match call.arguments() {
                Ok(args) => args,
                Err(err) => {
                    warn!("tool {} ({}) sent unparsable arguments: {}", name, call.id, err);
                    outputs.push(ToolOutput {
                        tool_call_id: call.id.clone(),
                        output: format!("error: invalid arguments for '{}': {}", name, err),
                    });
                    continue;
                }
            };
            info!("calling {} (tool call {}) with args: {}", name, call.id, args);

            let output = match self.tools.dispatch(name, args, ctx) {
                Some(Ok(output)) => output,
                Some(Err(err)) => {
                    let err = AssistantError::ToolExecution {
                        name: name.to_string(),
                        detail: err.to_string(),
                    };
                    warn!("{}", err);
                    format!("error: {}", err)
                }
                None => {
                    warn!("{}", AssistantError::ToolNotFound(name.to_string()));
                    match self.config.unknown_tool_policy {
                        UnknownToolPolicy::ErrorOutput => {
                            format!("error: tool '{}' is not available", name)
                        }
                        UnknownToolPolicy::Skip => continue,
                    }
                }
            };
            outputs.push(ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            });
        }
        outputs
    }

    /// Returns `(name, file id)` for every file attached to the turn.
    fn upload_files(&self, files: Vec<File>) -> Vec<(String, String)> {
        let fetcher = HttpFileFetcher::new(None);
        let mut uploaded = Vec::new();
        for mut file in files {
            // Files already stored with the assistant API are attached as is.
            if let (Some(id), None, None) = (&file.id, &file.url, &file.content) {
                uploaded.push((file.display_name().to_string(), id.clone()));
                continue;
            }
            if let Err(err) = file.ensure_content(&fetcher) {
                warn!("dropping attachment: {}", err);
                continue;
            }
            match self.api.upload_file(&file) {
                Ok(id) => {
                    info!("uploaded {} as {}", file.display_name(), id);
                    uploaded.push((file.display_name().to_string(), id));
                }
                Err(err) => warn!(
                    "dropping attachment: {}",
                    AssistantError::AttachmentDownload {
                        name: file.display_name().to_string(),
                        detail: err.to_string(),
                    }
                ),
            }
        }
        uploaded
    }

    fn cancel_quietly(&self, thread_id: &str, run_id: &str) {
        if let Err(err) = self.api.cancel_run(thread_id, run_id) {
            warn!("failed to cancel run {}: {}", run_id, err);
        }
    }

    fn collect_reply(&self, thread_id: &str) -> Result<Reply, AssistantError> {
        let messages = self.api.list_messages(thread_id)?;
        let latest = latest_assistant_messages(&messages);

        let mut texts = Vec::new();
        let mut attachments = Vec::new();
        for message in latest {
            let mut text = String::new();
            for part in &message.content {
                match part {
                    MessageContent::Text { text: content } => text.push_str(&content.value),
                    MessageContent::ImageFile { image_file } => {
                        match self.api.file_content(&image_file.file_id) {
                            Ok(bytes) => attachments.push(File::local(
                                format!("{}.png", image_file.file_id),
                                "png",
                                bytes,
                            )),
                            Err(err) => warn!(
                                "could not download generated image {}: {}",
                                image_file.file_id, err
                            ),
                        }
                    }
                    MessageContent::Other => {}
                }
            }
            if !text.is_empty() {
                texts.push(text);
            }
        }

        Ok(Reply {
            text: texts.join("\n\n"),
            attachments,
        })
    }
}

/// The newest contiguous block of assistant messages, oldest first.
///
/// `messages` must be ordered newest first.
/// Tells the assistant which file ids came with the message so it can hand
/// them on to other agents.
fn with_upload_note(text: String, uploaded: &[(String, String)]) -> String {
    if uploaded.is_empty() {
        return text;
    }
    let names: Vec<&str> = uploaded.iter().map(|(name, _)| name.as_str()).collect();
    let ids: Vec<&str> = uploaded.iter().map(|(_, id)| id.as_str()).collect();
    format!(
        "{}\n\n<log start> Files uploaded. Filenames: {} with IDs: {} <log end>",
        text,
        names.join(", "),
        ids.join(", ")
    )
}

pub fn latest_assistant_messages(messages: &[ThreadMessage]) -> Vec<&ThreadMessage> {
    let mut latest: Vec<&ThreadMessage> = messages
        .iter()
        .take_while(|message| message.role == Role::Assistant)
        .collect();
    latest.reverse();
    latest
}
