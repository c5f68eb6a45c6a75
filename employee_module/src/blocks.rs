//! Markdown to page-block conversion.
//!
//! Assistant replies are markdown; Notion pages are lists of typed blocks
//! holding styled text runs. [`render`] walks the markdown syntax tree and
//! emits blocks in document order, and [`Block::to_notion`] serialises them
//! for the Notion API.

use markdown::mdast::Node;
use markdown::ParseOptions;
use serde_json::{json, Value};

/// Notion rejects rich text items longer than this.
pub const NOTION_TEXT_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub content: String,
    pub annotations: Annotations,
    pub link: Option<String>,
}

impl TextRun {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            annotations: Annotations::default(),
            link: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<TextRun>),
    Heading { level: u8, runs: Vec<TextRun> },
    BulletedItem(Vec<TextRun>),
    NumberedItem(Vec<TextRun>),
    Image { url: String, caption: Option<String> },
    Code { language: Option<String>, text: String },
}

#[derive(Debug, thiserror::Error)]
#[error("markdown parse error: {0}")]
pub struct MarkdownError(String);

/// Convert a markdown document to blocks, preserving document order.
pub fn render(markdown_text: &str) -> Result<Vec<Block>, MarkdownError> {
    let tree = markdown::to_mdast(markdown_text, &ParseOptions::default())
        .map_err(|err| MarkdownError(err.to_string()))?;
    let mut blocks = Vec::new();
    render_block(&tree, &mut blocks);
    Ok(blocks)
}

/// Styled runs of a markdown snippet, ignoring block structure and images.
pub fn render_runs(markdown_text: &str) -> Result<Vec<TextRun>, MarkdownError> {
    let mut runs = Vec::new();
    for block in render(markdown_text)? {
        let block_runs = match block {
            Block::Paragraph(runs)
            | Block::Heading { runs, .. }
            | Block::BulletedItem(runs)
            | Block::NumberedItem(runs) => runs,
            Block::Code { text, .. } => vec![TextRun {
                content: text,
                annotations: Annotations {
                    code: true,
                    ..Default::default()
                },
                link: None,
            }],
            Block::Image { .. } => continue,
        };
        if !runs.is_empty() {
            runs.push(TextRun::plain("\n"));
        }
        runs.extend(block_runs);
    }
    Ok(runs)
}

fn render_block(node: &Node, blocks: &mut Vec<Block>) {
    match node {
        Node::Root(root) => {
            for child in &root.children {
                render_block(child, blocks);
            }
        }
        Node::Paragraph(paragraph) => emit_inline(&paragraph.children, Block::Paragraph, blocks),
        Node::Heading(heading) => {
            let level = heading.depth;
            emit_inline(&heading.children, |runs| Block::Heading { level, runs }, blocks)
        }
        Node::List(list) => {
            let ordered = list.ordered;
            for item in &list.children {
                let Node::ListItem(item) = item else {
                    continue;
                };
                for child in &item.children {
                    match child {
                        Node::Paragraph(paragraph) if ordered => {
                            emit_inline(&paragraph.children, Block::NumberedItem, blocks)
                        }
                        Node::Paragraph(paragraph) => {
                            emit_inline(&paragraph.children, Block::BulletedItem, blocks)
                        }
                        other => render_block(other, blocks),
                    }
                }
            }
        }
        Node::Code(code) => blocks.push(Block::Code {
            language: code.lang.clone(),
            text: code.value.clone(),
        }),
        _ => {}
    }
}

enum Inline {
    Run(TextRun),
    Image { url: String, caption: Option<String> },
}

#[derive(Clone, Default)]
struct Style {
    annotations: Annotations,
    link: Option<String>,
}

impl Style {
    fn run(&self, content: &str) -> Inline {
        Inline::Run(TextRun {
            content: content.to_string(),
            annotations: self.annotations,
            link: self.link.clone(),
        })
    }
}

/// Fold inline children into blocks built by `make`; images split the text.
fn emit_inline(children: &[Node], make: impl Fn(Vec<TextRun>) -> Block, blocks: &mut Vec<Block>) {
    let mut pieces = Vec::new();
    for child in children {
        collect_inline(child, &Style::default(), &mut pieces);
    }

    let mut runs: Vec<TextRun> = Vec::new();
    for piece in pieces {
        match piece {
            Inline::Run(run) => runs.push(run),
            Inline::Image { url, caption } => {
                flush_runs(&mut runs, &make, blocks);
                blocks.push(Block::Image { url, caption });
            }
        }
    }
    flush_runs(&mut runs, &make, blocks);
}

fn flush_runs(
    runs: &mut Vec<TextRun>,
    make: &impl Fn(Vec<TextRun>) -> Block,
    blocks: &mut Vec<Block>,
) {
    if runs.iter().all(|run| run.content.trim().is_empty()) {
        runs.clear();
        return;
    }
    blocks.push(make(std::mem::take(runs)));
}

fn collect_inline(node: &Node, style: &Style, pieces: &mut Vec<Inline>) {
    match node {
        Node::Text(text) => pieces.push(style.run(&text.value)),
        Node::InlineCode(code) => {
            let mut style = style.clone();
            style.annotations.code = true;
            pieces.push(style.run(&code.value));
        }
        Node::Break(_) => pieces.push(style.run("\n")),
        Node::Strong(strong) => {
            let mut style = style.clone();
            style.annotations.bold = true;
            for child in &strong.children {
                collect_inline(child, &style, pieces);
            }
        }
        Node::Emphasis(emphasis) => {
            let mut style = style.clone();
            style.annotations.italic = true;
            for child in &emphasis.children {
                collect_inline(child, &style, pieces);
            }
        }
        Node::Link(link) => {
            let mut style = style.clone();
            style.link = Some(link.url.clone());
            for child in &link.children {
                collect_inline(child, &style, pieces);
            }
        }
        Node::Image(image) => pieces.push(Inline::Image {
            url: image.url.clone(),
            caption: Some(image.alt.clone()).filter(|alt| !alt.is_empty()),
        }),
        _ => {}
    }
}

impl Block {
    /// Notion API block object.
    pub fn to_notion(&self) -> Value {
        match self {
            Block::Paragraph(runs) => text_block("paragraph", runs),
            Block::Heading { level, runs } => {
                text_block(&format!("heading_{}", (*level).clamp(1, 3)), runs)
            }
            Block::BulletedItem(runs) => text_block("bulleted_list_item", runs),
            Block::NumberedItem(runs) => text_block("numbered_list_item", runs),
            Block::Image { url, caption } => {
                let caption = caption
                    .as_deref()
                    .map(|c| rich_text(&[TextRun::plain(c)]))
                    .unwrap_or_default();
                json!({
                    "object": "block",
                    "type": "image",
                    "image": {
                        "type": "external",
                        "external": {"url": url},
                        "caption": caption,
                    }
                })
            }
            Block::Code { language, text } => json!({
                "object": "block",
                "type": "code",
                "code": {
                    "rich_text": rich_text(&[TextRun::plain(text.clone())]),
                    "language": notion_language(language.as_deref()),
                }
            }),
        }
    }
}

fn text_block(kind: &str, runs: &[TextRun]) -> Value {
    json!({
        "object": "block",
        "type": kind,
        kind: {"rich_text": rich_text(runs)},
    })
}

/// Notion rich text items for `runs`, splitting overlong runs.
pub fn rich_text(runs: &[TextRun]) -> Vec<Value> {
    let mut items = Vec::new();
    for run in runs {
        for chunk in split_chars(&run.content, NOTION_TEXT_LIMIT) {
            let link = run.link.as_ref().map(|url| json!({"url": url}));
            items.push(json!({
                "type": "text",
                "text": {"content": chunk, "link": link},
                "annotations": {
                    "bold": run.annotations.bold,
                    "italic": run.annotations.italic,
                    "code": run.annotations.code,
                },
            }));
        }
    }
    items
}

fn split_chars(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn notion_language(language: Option<&str>) -> &'static str {
    let Some(language) = language else {
        return "plain text";
    };
    match language.to_ascii_lowercase().as_str() {
        "py" | "python" => "python",
        "js" | "javascript" => "javascript",
        "ts" | "typescript" => "typescript",
        "rs" | "rust" => "rust",
        "sh" | "shell" => "shell",
        "bash" => "bash",
        "sql" => "sql",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "html" => "html",
        "css" => "css",
        "java" => "java",
        "go" => "go",
        "c" => "c",
        "cpp" | "c++" => "c++",
        "r" => "r",
        "markdown" | "md" => "markdown",
        _ => "plain text",
    }
}
