use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::ToolError;
use crate::types::{ConversationKey, File};

/// JSON-schema description of a tool, installed on the remote assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// The `{"type": "function", ...}` entry of an assistant's tool list.
    pub fn to_function_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// State a tool may read or extend during one turn.
#[derive(Debug)]
pub struct ToolContext {
    key: ConversationKey,
    attachments: Vec<File>,
}

impl ToolContext {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            attachments: Vec::new(),
        }
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Add a file to the reply of the current turn.
    pub fn attach(&mut self, file: File) {
        self.attachments.push(file);
    }

    pub fn attachments(&self) -> &[File] {
        &self.attachments
    }

    pub fn into_attachments(self) -> Vec<File> {
        self.attachments
    }
}

/// A locally executed function the remote run can call.
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned;

    fn definition(&self) -> ToolDefinition;

    fn call(&self, args: Self::Args, ctx: &mut ToolContext) -> Result<String, ToolError>;
}

trait DynTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn call_json(&self, args: Value, ctx: &mut ToolContext) -> Result<String, ToolError>;
}

impl<T: Tool> DynTool for T {
    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn call_json(&self, args: Value, ctx: &mut ToolContext) -> Result<String, ToolError> {
        let args: T::Args =
            serde_json::from_value(args).map_err(|err| ToolError::InvalidArguments {
                name: Tool::definition(self).name,
                detail: err.to_string(),
            })?;
        self.call(args, ctx)
    }
}

/// Name-indexed set of tools. Read-only once built.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn DynTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), ToolError> {
        let name = Tool::definition(&tool).name;
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.tools.insert(name, Box::new(tool));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the tool named `name`. `None` when no such tool is registered.
    pub fn dispatch(
        &self,
        name: &str,
        args: Value,
        ctx: &mut ToolContext,
    ) -> Option<Result<String, ToolError>> {
        let tool = self.tools.get(name)?;
        Some(tool.call_json(args, ctx))
    }
}
