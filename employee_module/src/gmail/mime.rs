//! Gmail message payloads in, RFC 2822 replies out.

use assistant_module::types::File;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use scraper::Html;
use serde::Deserialize;

use crate::channel::AdapterError;

/// Gmail pads base64url bodies inconsistently.
pub(crate) const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ============================================================================
// Gmail API message types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub payload: MessagePart,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl MessagePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    fn decoded_body(&self) -> Option<String> {
        let data = self.body.data.as_deref()?;
        let bytes = URL_SAFE_LENIENT.decode(data).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn walk<'a>(&'a self, out: &mut Vec<&'a MessagePart>) {
        out.push(self);
        for part in &self.parts {
            part.walk(out);
        }
    }
}

/// A polled email, ready to become a turn.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub id: String,
    pub thread_id: String,
    /// Bare sender address.
    pub from: String,
    pub subject: String,
    pub message_id: Option<String>,
    pub references: Option<String>,
    pub body: String,
    /// Remote references; `id` holds the Gmail attachment id.
    pub attachments: Vec<File>,
}

impl InboundEmail {
    pub fn from_message(message: &GmailMessage) -> Result<Self, AdapterError> {
        let payload = &message.payload;
        let from = payload
            .header("From")
            .map(parse_address)
            .filter(|address| !address.is_empty())
            .ok_or_else(|| AdapterError::ParseError(format!("message {} has no sender", message.id)))?;

        let mut parts = Vec::new();
        payload.walk(&mut parts);

        let plain = parts
            .iter()
            .filter(|part| part.filename.is_empty())
            .find(|part| part.mime_type == "text/plain")
            .and_then(|part| part.decoded_body());
        let body = match plain {
            Some(text) => text,
            None => parts
                .iter()
                .filter(|part| part.filename.is_empty())
                .find(|part| part.mime_type == "text/html")
                .and_then(|part| part.decoded_body())
                .map(|html| html_to_text(&html))
                .unwrap_or_default(),
        };

        let attachments = parts
            .iter()
            .filter(|part| !part.filename.is_empty())
            .filter_map(|part| {
                part.body.attachment_id.as_ref().map(|attachment_id| File {
                    id: Some(attachment_id.clone()),
                    url: None,
                    name: Some(part.filename.clone()),
                    filetype: extension(&part.filename),
                    content: None,
                })
            })
            .collect();

        Ok(Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            from,
            subject: payload.header("Subject").unwrap_or_default().to_string(),
            message_id: payload.header("Message-ID").map(str::to_string),
            references: payload.header("References").map(str::to_string),
            body: body.trim().to_string(),
            attachments,
        })
    }

    /// The text handed to the assistant.
    pub fn prompt(&self) -> String {
        if self.subject.is_empty() {
            self.body.clone()
        } else {
            format!("Subject: {}\n\n{}", self.subject, self.body)
        }
    }
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// `Dana Smith <dana@example.com>` -> `dana@example.com`.
pub fn parse_address(value: &str) -> String {
    let value = value.trim();
    match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].trim().to_string(),
        _ => value.trim_matches('"').to_string(),
    }
}

/// Visible text of an HTML body, one line per non-empty source line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();
    for node in document.root_element().descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| matches!(element.name(), "script" | "style" | "head"))
        });
        if !hidden {
            text.push_str(fragment);
        }
    }
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reply_subject(subject: &str) -> String {
    if subject.trim().to_ascii_lowercase().starts_with("re:") {
        subject.trim().to_string()
    } else {
        format!("Re: {}", subject.trim())
    }
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Build a `multipart/mixed` reply to `original` with an HTML body rendered
/// from markdown and every attachment that has content.
pub fn build_reply(original: &InboundEmail, markdown_body: &str, attachments: &[File]) -> String {
    let boundary = format!("employee-{}", uuid::Uuid::new_v4().simple());
    let html = markdown::to_html(markdown_body);

    let mut headers = vec![
        format!("To: {}", original.from),
        format!("Subject: {}", encode_header(&reply_subject(&original.subject))),
    ];
    if let Some(message_id) = &original.message_id {
        headers.push(format!("In-Reply-To: {}", message_id));
        let references = match &original.references {
            Some(existing) => format!("{} {}", existing, message_id),
            None => message_id.clone(),
        };
        headers.push(format!("References: {}", references));
    }
    headers.push("MIME-Version: 1.0".to_string());
    headers.push(format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"",
        boundary
    ));

    let mut out = headers.join("\r\n");
    out.push_str("\r\n\r\n");

    out.push_str(&format!("--{}\r\n", boundary));
    out.push_str("Content-Type: text/html; charset=\"UTF-8\"\r\n");
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    out.push_str(&wrap_base64(html.as_bytes()));
    out.push_str("\r\n");

    for file in attachments {
        let Some(content) = file.content.as_deref() else {
            continue;
        };
        let name = file.display_name().replace('"', "");
        let mime = mime_guess::from_path(&name).first_or_octet_stream();
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str(&format!("Content-Type: {}; name=\"{}\"\r\n", mime, name));
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n",
            name
        ));
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        out.push_str(&wrap_base64(content));
        out.push_str("\r\n");
    }
    out.push_str(&format!("--{}--\r\n", boundary));
    out
}
