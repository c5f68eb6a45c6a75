#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assistant_module::client::AssistantsApi;
use assistant_module::errors::{AssistantError, ToolError};
use assistant_module::tools::{Tool, ToolContext, ToolDefinition};
use assistant_module::types::{
    Assistant, AssistantSpec, File, RemoteFile, Run, RunStatus, ThreadMessage, ToolOutput,
};
use serde::Deserialize;
use serde_json::json;

/// One scripted observation of a run.
#[derive(Debug, Clone)]
pub enum Step {
    Status(RunStatus),
    ToolCalls(Vec<(&'static str, &'static str, &'static str)>),
    Failed(&'static str),
}

/// In-process stand-in for the remote assistant API.
///
/// Every run walks the same script: `create_run` reports the first step and
/// each `retrieve_run` the next one; the last step repeats. Submitting tool
/// outputs reports `queued` without advancing. After `cancel_run`, the run
/// reports `cancelled`. On completion, two assistant messages are appended to
/// the thread, the second one carrying an image when `image_file_id` is set.
pub struct ScriptedApi {
    script: Vec<Step>,
    image_file_id: Option<String>,
    fail_thread_creation: bool,
    fail_tool_submission: bool,
    state: Mutex<State>,
    threads_created: AtomicUsize,
}

#[derive(Default)]
struct State {
    threads: HashMap<String, Vec<ThreadMessage>>,
    cursors: HashMap<String, usize>,
    cancelled: Vec<String>,
    finished: Vec<String>,
    submitted: Vec<Vec<ToolOutput>>,
    attached: Vec<Vec<String>>,
    uploads: Vec<String>,
    runs_created: usize,
    active_by_thread: HashMap<String, usize>,
    max_active_by_thread: HashMap<String, usize>,
    message_counter: usize,
}

impl ScriptedApi {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            image_file_id: None,
            fail_thread_creation: false,
            fail_tool_submission: false,
            state: Mutex::new(State::default()),
            threads_created: AtomicUsize::new(0),
        }
    }

    pub fn with_image(mut self, file_id: &str) -> Self {
        self.image_file_id = Some(file_id.to_string());
        self
    }

    pub fn failing_thread_creation(mut self) -> Self {
        self.fail_thread_creation = true;
        self
    }

    pub fn failing_tool_submission(mut self) -> Self {
        self.fail_tool_submission = true;
        self
    }

    pub fn user_message_texts(&self, thread_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .threads
            .get(thread_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.role == assistant_module::types::Role::User)
                    .filter_map(|m| match m.content.first() {
                        Some(assistant_module::types::MessageContent::Text { text }) => {
                            Some(text.value.clone())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn runs_created(&self) -> usize {
        self.state.lock().unwrap().runs_created
    }

    pub fn submitted(&self) -> Vec<Vec<ToolOutput>> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().unwrap().cancelled.len()
    }

    pub fn attached_file_ids(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().attached.clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn user_messages(&self, thread_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .threads
            .get(thread_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.role == assistant_module::types::Role::User)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn max_concurrent_runs(&self, thread_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.max_active_by_thread.get(thread_id).copied().unwrap_or(0)
    }

    fn step_run(&self, state: &mut State, thread_id: &str, run_id: &str) -> Run {
        let status_override = if state.cancelled.iter().any(|id| id == run_id) {
            Some(Step::Status(RunStatus::Cancelled))
        } else {
            None
        };
        let cursor = state.cursors.get(run_id).copied().unwrap_or(0);
        let step = status_override
            .unwrap_or_else(|| self.script[cursor.min(self.script.len() - 1)].clone());
        let run = build_run(thread_id, run_id, &step);

        if run.status.is_terminal() && !state.finished.iter().any(|id| id == run_id) {
            state.finished.push(run_id.to_string());
            if let Some(active) = state.active_by_thread.get_mut(thread_id) {
                *active -= 1;
            }
            if run.status == RunStatus::Completed {
                let mut parts = vec![json!({"type": "text", "text": {"value": format!("answer {} part 2", run_id), "annotations": []}})];
                if let Some(file_id) = &self.image_file_id {
                    parts.push(json!({"type": "image_file", "image_file": {"file_id": file_id}}));
                }
                let first = message(state, "assistant", vec![json!({"type": "text", "text": {"value": format!("answer {} part 1", run_id), "annotations": []}})]);
                let second = message(state, "assistant", parts);
                let thread = state.threads.entry(thread_id.to_string()).or_default();
                thread.push(first);
                thread.push(second);
            }
        }
        run
    }
}

fn message(state: &mut State, role: &str, content: Vec<serde_json::Value>) -> ThreadMessage {
    state.message_counter += 1;
    serde_json::from_value(json!({
        "id": format!("msg_{}", state.message_counter),
        "role": role,
        "content": content,
    }))
    .unwrap()
}

fn build_run(thread_id: &str, run_id: &str, step: &Step) -> Run {
    let value = match step {
        Step::Status(status) => json!({"id": run_id, "thread_id": thread_id, "status": status}),
        Step::Failed(detail) => json!({
            "id": run_id,
            "thread_id": thread_id,
            "status": "failed",
            "last_error": {"code": "server_error", "message": detail}
        }),
        Step::ToolCalls(calls) => {
            let tool_calls: Vec<_> = calls
                .iter()
                .map(|(id, name, args)| {
                    json!({"id": id, "type": "function", "function": {"name": name, "arguments": args}})
                })
                .collect();
            json!({
                "id": run_id,
                "thread_id": thread_id,
                "status": "requires_action",
                "required_action": {
                    "type": "submit_tool_outputs",
                    "submit_tool_outputs": {"tool_calls": tool_calls}
                }
            })
        }
    };
    serde_json::from_value(value).unwrap()
}

impl AssistantsApi for ScriptedApi {
    fn create_thread(&self) -> Result<String, AssistantError> {
        if self.fail_thread_creation {
            return Err(AssistantError::Api {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst);
        let id = format!("thread_{}", n);
        self.state
            .lock()
            .unwrap()
            .threads
            .insert(id.clone(), Vec::new());
        Ok(id)
    }

    fn add_message(
        &self,
        thread_id: &str,
        text: &str,
        file_ids: &[String],
    ) -> Result<String, AssistantError> {
        let mut state = self.state.lock().unwrap();
        let msg = message(
            &mut state,
            "user",
            vec![json!({"type": "text", "text": {"value": text, "annotations": []}})],
        );
        let id = msg.id.clone();
        state.threads.entry(thread_id.to_string()).or_default().push(msg);
        state.attached.push(file_ids.to_vec());
        Ok(id)
    }

    fn create_run(&self, thread_id: &str, _assistant_id: &str) -> Result<Run, AssistantError> {
        let mut state = self.state.lock().unwrap();
        state.runs_created += 1;
        let run_id = format!("run_{}", state.runs_created);
        let active = state
            .active_by_thread
            .entry(thread_id.to_string())
            .or_default();
        *active += 1;
        let active = *active;
        let max = state
            .max_active_by_thread
            .entry(thread_id.to_string())
            .or_default();
        *max = (*max).max(active);
        state.cursors.insert(run_id.clone(), 0);
        Ok(self.step_run(&mut state, thread_id, &run_id))
    }

    fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let mut state = self.state.lock().unwrap();
        *state.cursors.entry(run_id.to_string()).or_default() += 1;
        Ok(self.step_run(&mut state, thread_id, run_id))
    }

    fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AssistantError> {
        self.state.lock().unwrap().submitted.push(outputs.to_vec());
        if self.fail_tool_submission {
            return Err(AssistantError::Api {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(build_run(thread_id, run_id, &Step::Status(RunStatus::Queued)))
    }

    fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.state.lock().unwrap().cancelled.push(run_id.to_string());
        Ok(build_run(thread_id, run_id, &Step::Status(RunStatus::Cancelling)))
    }

    fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let state = self.state.lock().unwrap();
        let mut messages = state.threads.get(thread_id).cloned().unwrap_or_default();
        messages.reverse();
        Ok(messages)
    }

    fn file_content(&self, file_id: &str) -> Result<Vec<u8>, AssistantError> {
        Ok(format!("bytes of {}", file_id).into_bytes())
    }

    fn upload_file(&self, file: &File) -> Result<String, AssistantError> {
        let mut state = self.state.lock().unwrap();
        state.uploads.push(file.display_name().to_string());
        Ok(format!("file-up-{}", state.uploads.len()))
    }

    fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, AssistantError> {
        Ok(Assistant {
            id: "asst_new".to_string(),
            name: Some(spec.name.clone()),
            model: spec.model.clone(),
            instructions: Some(spec.instructions.clone()),
        })
    }

    fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, AssistantError> {
        Ok(Assistant {
            id: assistant_id.to_string(),
            name: None,
            model: "gpt-4o".to_string(),
            instructions: None,
        })
    }

    fn list_assistants(&self) -> Result<Vec<Assistant>, AssistantError> {
        Ok(Vec::new())
    }

    fn delete_assistant(&self, _assistant_id: &str) -> Result<(), AssistantError> {
        Ok(())
    }

    fn list_files(&self, _purpose: &str) -> Result<Vec<RemoteFile>, AssistantError> {
        Ok(Vec::new())
    }

    fn delete_file(&self, _file_id: &str) -> Result<(), AssistantError> {
        Ok(())
    }
}

/// Tool that counts its invocations.
#[derive(Clone, Default)]
pub struct LookupTool {
    pub calls: Arc<AtomicUsize>,
}

impl LookupTool {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
pub struct LookupArgs {
    pub query: String,
}

impl Tool for LookupTool {
    type Args = LookupArgs;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "lookup".to_string(),
            description: "Look something up".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }
    }

    fn call(&self, args: LookupArgs, _ctx: &mut ToolContext) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if args.query == "explode" {
            return Err(ToolError::Execution("lookup backend down".to_string()));
        }
        Ok(format!("result for {}", args.query))
    }
}
