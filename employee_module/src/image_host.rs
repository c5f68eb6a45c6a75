//! Public image hosting for generated attachments.
//!
//! Slack image blocks and Notion external images need a public URL; Imgur
//! anonymous uploads provide one.

use std::env;

use assistant_module::types::File;
use base64::Engine;
use serde::Deserialize;
use tracing::info;

use crate::channel::AdapterError;

pub const DEFAULT_IMGUR_API_URL: &str = "https://api.imgur.com/3";

/// Uploads bytes somewhere public and records the resulting link on the file.
pub trait ImageHost: Send + Sync {
    fn upload(&self, file: &mut File) -> Result<String, AdapterError>;
}

/// Whether `file` looks like an image, by filetype or file name.
pub fn is_image(file: &File) -> bool {
    if let Some(filetype) = file.filetype.as_deref() {
        if matches!(
            filetype.to_ascii_lowercase().as_str(),
            "png" | "jpg" | "jpeg" | "gif" | "webp"
        ) {
            return true;
        }
    }
    mime_guess::from_path(file.display_name())
        .first()
        .is_some_and(|mime| mime.essence_str().starts_with("image/"))
}

#[derive(Debug, Clone)]
pub struct ImgurHost {
    client_id: String,
    api_base: String,
    client: reqwest::blocking::Client,
}

impl ImgurHost {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            api_base: env::var("IMGUR_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_IMGUR_API_URL.to_string()),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// `None` unless `IMGUR_CLIENT_ID` is set.
    pub fn from_env() -> Option<Self> {
        env::var("IMGUR_CLIENT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl ImageHost for ImgurHost {
    fn upload(&self, file: &mut File) -> Result<String, AdapterError> {
        let content = file.content.as_deref().ok_or_else(|| {
            AdapterError::SendError(format!("{} has no content to upload", file.display_name()))
        })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);

        let response = self
            .client
            .post(format!("{}/image", self.api_base.trim_end_matches('/')))
            .header("Authorization", format!("Client-ID {}", self.client_id))
            .form(&[("image", encoded.as_str()), ("type", "base64")])
            .send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::SendError(format!(
                "imgur returned {}: {}",
                status, body
            )));
        }
        let uploaded: ImgurResponse = response.json()?;
        info!("hosted {} at {}", file.display_name(), uploaded.data.link);

        file.url = Some(uploaded.data.link.clone());
        file.id = Some(uploaded.data.id);
        Ok(uploaded.data.link)
    }
}

#[derive(Debug, Deserialize)]
struct ImgurResponse {
    data: ImgurImage,
}

#[derive(Debug, Deserialize)]
struct ImgurImage {
    id: String,
    link: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistant_module::types::FileState;

    #[test]
    fn upload_sets_public_link() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/image")
            .match_header("authorization", "Client-ID imgur-client")
            .match_body(mockito::Matcher::UrlEncoded("type".into(), "base64".into()))
            .with_status(200)
            .with_body(r#"{"data":{"id":"abc123","link":"https://i.imgur.com/abc123.png"},"success":true,"status":200}"#)
            .expect(1)
            .create();

        let host = ImgurHost::new("imgur-client").with_api_base(server.url());
        let mut file = File::local("file-1.png", "png", vec![1, 2, 3]);
        let link = host.upload(&mut file).unwrap();

        assert_eq!(link, "https://i.imgur.com/abc123.png");
        assert_eq!(file.url.as_deref(), Some("https://i.imgur.com/abc123.png"));
        assert_eq!(file.state(), FileState::Both);
        mock.assert();
    }

    #[test]
    fn recognises_images() {
        assert!(is_image(&File::local("plot.png", "png", vec![])));
        assert!(is_image(&File::remote_url("photo.JPG", "https://x/photo.JPG")));
        assert!(!is_image(&File::local("data.csv", "csv", vec![])));
    }

    #[test]
    fn upload_without_content_fails() {
        let host = ImgurHost::new("imgur-client").with_api_base("http://127.0.0.1:9");
        let mut file = File::remote_url("x.png", "https://example.com/x.png");
        assert!(matches!(
            host.upload(&mut file),
            Err(AdapterError::SendError(_))
        ));
    }
}
