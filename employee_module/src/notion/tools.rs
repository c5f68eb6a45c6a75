use std::sync::OnceLock;

use assistant_module::errors::ToolError;
use assistant_module::tools::{Tool, ToolContext, ToolDefinition};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::blocks::{render, render_runs};

use super::client::NotionClient;

pub const CREATE_PAGE: &str = "create_page";
pub const UPDATE_BLOCK: &str = "update_block";

fn execution(err: impl std::fmt::Display) -> ToolError {
    ToolError::Execution(err.to_string())
}

/// Creates a page in the configured database, or the first one shared with
/// the integration.
pub struct CreatePageTool {
    client: NotionClient,
    database_id: OnceLock<String>,
}

impl CreatePageTool {
    pub fn new(client: NotionClient, database_id: Option<String>) -> Self {
        let cell = OnceLock::new();
        if let Some(id) = database_id.filter(|id| !id.trim().is_empty()) {
            let _ = cell.set(id);
        }
        Self {
            client,
            database_id: cell,
        }
    }

    fn database_id(&self) -> Result<&str, ToolError> {
        if let Some(id) = self.database_id.get() {
            return Ok(id.as_str());
        }
        let found = self
            .client
            .first_database()
            .map_err(execution)?
            .ok_or_else(|| execution("no Notion database is shared with the integration"))?;
        Ok(self.database_id.get_or_init(|| found).as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePageArgs {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl Tool for CreatePageTool {
    type Args = CreatePageArgs;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: CREATE_PAGE.to_string(),
            description: "Create and upload a new Notion page.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "The title of the page."},
                    "content": {"type": "string", "description": "The content of the page, in markdown."}
                },
                "required": ["title"],
                "additionalProperties": false
            }),
        }
    }

    fn call(&self, args: CreatePageArgs, _ctx: &mut ToolContext) -> Result<String, ToolError> {
        let children = render(args.content.as_deref().unwrap_or_default())
            .map_err(execution)?
            .iter()
            .map(|block| block.to_notion())
            .collect();
        let database_id = self.database_id()?;
        let page = self
            .client
            .create_page(database_id, &args.title, children)
            .map_err(execution)?;
        info!("created notion page {} in {}", page.id, database_id);
        Ok(format!(
            "Created page '{}' with id {} at {}",
            args.title,
            page.id,
            page.url.as_deref().unwrap_or("(no url)")
        ))
    }
}

/// Rewrites the text of one block.
pub struct UpdateBlockTool {
    client: NotionClient,
}

impl UpdateBlockTool {
    pub fn new(client: NotionClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateBlockArgs {
    pub block_id: String,
    pub content: String,
}

impl Tool for UpdateBlockTool {
    type Args = UpdateBlockArgs;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: UPDATE_BLOCK.to_string(),
            description: "Replace the text of an existing Notion block. Use the Block ID shown in the page context.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "block_id": {"type": "string", "description": "The id of the block to update."},
                    "content": {"type": "string", "description": "The new text of the block, in markdown."}
                },
                "required": ["block_id", "content"],
                "additionalProperties": false
            }),
        }
    }

    fn call(&self, args: UpdateBlockArgs, _ctx: &mut ToolContext) -> Result<String, ToolError> {
        let runs = render_runs(&args.content).map_err(execution)?;
        self.client
            .update_block_text(&args.block_id, &runs)
            .map_err(execution)?;
        info!("updated notion block {}", args.block_id);
        Ok(format!("Updated block {}", args.block_id))
    }
}
