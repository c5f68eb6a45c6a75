use std::env;

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::blocks::{rich_text, TextRun};

pub const DEFAULT_NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

/// Notion accepts at most this many children per create/append request.
const MAX_CHILDREN_PER_REQUEST: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum NotionError {
    #[error("http error: {0}")]
    Http(String),
    #[error("notion returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for NotionError {
    fn from(err: reqwest::Error) -> Self {
        NotionError::Http(err.to_string())
    }
}

// ============================================================================
// Notion API object types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Paginated<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: Value,
}

impl Page {
    /// Plain text of the page's title property.
    pub fn title(&self) -> String {
        let Some(properties) = self.properties.as_object() else {
            return String::new();
        };
        properties
            .values()
            .find(|property| property.get("type").and_then(Value::as_str) == Some("title"))
            .and_then(|property| property.get("title"))
            .and_then(Value::as_array)
            .map(|parts| parts.iter().map(plain_text).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: String,
    pub discussion_id: String,
    pub parent: CommentParent,
    pub created_by: ObjectRef,
    #[serde(default)]
    pub rich_text: Vec<RichTextItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentParent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub block_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RichTextItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub plain_text: Option<String>,
    #[serde(default)]
    pub text: Option<TextObject>,
    #[serde(default)]
    pub mention: Option<Mention>,
}

impl RichTextItem {
    pub fn content(&self) -> &str {
        self.text
            .as_ref()
            .map(|text| text.content.as_str())
            .or(self.plain_text.as_deref())
            .unwrap_or_default()
    }

    /// Name of the mentioned user, for user mentions.
    pub fn mentioned_user(&self) -> Option<&str> {
        self.mention
            .as_ref()
            .and_then(|mention| mention.user.as_ref())
            .and_then(|user| user.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextObject {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mention {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person: Option<Person>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub email: Option<String>,
}

fn plain_text(item: &Value) -> String {
    item.get("plain_text")
        .or_else(|| item.pointer("/text/content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Readable content of a block object: the image URL for images, otherwise
/// the concatenated rich text.
pub fn block_text(block: &Value) -> String {
    let Some(kind) = block.get("type").and_then(Value::as_str) else {
        return String::new();
    };
    let body = &block[kind];
    if kind == "image" {
        let source = body.get("type").and_then(Value::as_str).unwrap_or("external");
        return body[source]["url"].as_str().unwrap_or_default().to_string();
    }
    body.get("rich_text")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(plain_text).collect())
        .unwrap_or_default()
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct NotionClient {
    token: String,
    api_base: String,
    client: Client,
}

impl NotionClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: env::var("NOTION_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_NOTION_API_URL.to_string()),
            client: Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, NotionError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().unwrap_or(Value::Null);
            return Err(NotionError::Api {
                status: status.as_u16(),
                code: body["code"].as_str().unwrap_or("unknown").to_string(),
                message: body["message"].as_str().unwrap_or_default().to_string(),
            });
        }
        Ok(response.json()?)
    }

    /// Collects every page of a cursor-paginated endpoint.
    fn paginate<T: DeserializeOwned>(
        &self,
        mut request: impl FnMut(Option<&str>) -> RequestBuilder,
    ) -> Result<Vec<T>, NotionError> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: Paginated<T> = self.send(request(cursor.as_deref()))?;
            results.extend(page.results);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok(results)
    }

    fn search(&self, object: &str) -> impl FnMut(Option<&str>) -> RequestBuilder + '_ {
        let object = object.to_string();
        move |cursor| {
            let mut body = json!({"filter": {"property": "object", "value": object}});
            if let Some(cursor) = cursor {
                body["start_cursor"] = json!(cursor);
            }
            self.client.post(self.url("search")).json(&body)
        }
    }

    /// Every page shared with the integration.
    pub fn search_pages(&self) -> Result<Vec<Page>, NotionError> {
        let pages: Vec<Page> = self.paginate(self.search("page"))?;
        debug!("notion search returned {} page(s)", pages.len());
        Ok(pages)
    }

    /// Id of the first database shared with the integration.
    pub fn first_database(&self) -> Result<Option<String>, NotionError> {
        let body = json!({"filter": {"property": "object", "value": "database"}});
        let found: Paginated<ObjectRef> =
            self.send(self.client.post(self.url("search")).json(&body))?;
        Ok(found.results.into_iter().next().map(|database| database.id))
    }

    pub fn block_children(&self, block_id: &str) -> Result<Vec<Value>, NotionError> {
        let url = self.url(&format!("blocks/{}/children", block_id));
        self.paginate(|cursor| {
            let mut query = vec![("page_size", "100".to_string())];
            if let Some(cursor) = cursor {
                query.push(("start_cursor", cursor.to_string()));
            }
            self.client.get(&url).query(&query)
        })
    }

    pub fn retrieve_block(&self, block_id: &str) -> Result<Value, NotionError> {
        self.send(self.client.get(self.url(&format!("blocks/{}", block_id))))
    }

    pub fn retrieve_page(&self, page_id: &str) -> Result<Page, NotionError> {
        self.send(self.client.get(self.url(&format!("pages/{}", page_id))))
    }

    pub fn retrieve_user(&self, user_id: &str) -> Result<User, NotionError> {
        self.send(self.client.get(self.url(&format!("users/{}", user_id))))
    }

    /// Unresolved comments on a page or block.
    pub fn list_comments(&self, block_id: &str) -> Result<Vec<Comment>, NotionError> {
        let url = self.url("comments");
        self.paginate(|cursor| {
            let mut query = vec![("block_id", block_id.to_string())];
            if let Some(cursor) = cursor {
                query.push(("start_cursor", cursor.to_string()));
            }
            self.client.get(&url).query(&query)
        })
    }

    /// Reply inside an existing discussion thread.
    pub fn create_comment(&self, discussion_id: &str, runs: &[TextRun]) -> Result<String, NotionError> {
        let body = json!({
            "discussion_id": discussion_id,
            "rich_text": rich_text(runs),
        });
        let created: ObjectRef = self.send(self.client.post(self.url("comments")).json(&body))?;
        Ok(created.id)
    }

    /// New database page titled `title` with `children` blocks.
    pub fn create_page(
        &self,
        database_id: &str,
        title: &str,
        children: Vec<Value>,
    ) -> Result<Page, NotionError> {
        let mut batches = children.chunks(MAX_CHILDREN_PER_REQUEST);
        let first = batches.next().map(<[Value]>::to_vec).unwrap_or_default();
        let body = json!({
            "parent": {"database_id": database_id},
            "properties": {
                "title": {"title": rich_text(&[TextRun::plain(title)])}
            },
            "children": first,
        });
        let page: Page = self.send(self.client.post(self.url("pages")).json(&body))?;
        for batch in batches {
            self.append_children(&page.id, batch)?;
        }
        Ok(page)
    }

    pub fn append_children(&self, block_id: &str, children: &[Value]) -> Result<(), NotionError> {
        let _: Value = self.send(
            self.client
                .patch(self.url(&format!("blocks/{}/children", block_id)))
                .json(&json!({"children": children})),
        )?;
        Ok(())
    }

    /// Replace the rich text of a text-bearing block, keeping its type.
    pub fn update_block_text(&self, block_id: &str, runs: &[TextRun]) -> Result<Value, NotionError> {
        let block = self.retrieve_block(block_id)?;
        let kind = block
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| NotionError::Unsupported(format!("block {} has no type", block_id)))?;
        if block[kind].get("rich_text").is_none() {
            return Err(NotionError::Unsupported(format!(
                "block {} of type {} has no text to update",
                block_id, kind
            )));
        }
        let body = json!({ kind: {"rich_text": rich_text(runs)} });
        self.send(
            self.client
                .patch(self.url(&format!("blocks/{}", block_id)))
                .json(&body),
        )
    }

    /// `"<title>\n\nBlock ID: <id>\n<text>"`, one section per top-level block.
    pub fn page_text(&self, page_id: &str) -> Result<String, NotionError> {
        let title = self.retrieve_page(page_id)?.title();
        let sections: Vec<String> = self
            .block_children(page_id)?
            .iter()
            .map(|block| {
                format!(
                    "Block ID: {}\n{}",
                    block["id"].as_str().unwrap_or_default(),
                    block_text(block)
                )
            })
            .collect();
        Ok(format!("{}\n\n{}", title, sections.join("\n\n")))
    }
}
