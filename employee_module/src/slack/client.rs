use std::env;

use assistant_module::types::{File, HttpFileFetcher};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::channel::AdapterError;

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Blocking Slack Web API client authenticated with a bot token.
#[derive(Debug, Clone)]
pub struct SlackClient {
    bot_token: String,
    api_base: String,
    client: Client,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: env::var("SLACK_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SLACK_API_URL.to_string()),
            client: Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Downloads `url_private` files with the bot token.
    pub fn file_fetcher(&self) -> HttpFileFetcher {
        HttpFileFetcher::new(Some(self.bot_token.clone()))
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), method)
    }

    fn post_json(&self, method: &str, body: &Value) -> Result<Value, AdapterError> {
        debug!("slack {}", method);
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()?;
        check_ok(method, response)
    }

    fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value, AdapterError> {
        debug!("slack {}", method);
        let response = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()?;
        check_ok(method, response)
    }

    /// User id of the bot itself.
    pub fn auth_test(&self) -> Result<String, AdapterError> {
        let body = self.post_json("auth.test", &json!({}))?;
        body.get("user_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::ParseError("auth.test returned no user_id".to_string()))
    }

    pub fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), AdapterError> {
        self.post_json(
            "reactions.add",
            &json!({"channel": channel, "timestamp": ts, "name": name}),
        )?;
        Ok(())
    }

    /// Profile email of `user`, if the workspace exposes it.
    pub fn user_email(&self, user: &str) -> Result<Option<String>, AdapterError> {
        let body = self.get("users.info", &[("user", user)])?;
        Ok(body
            .pointer("/user/profile/email")
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
            .map(str::to_string))
    }

    /// Post a message; returns its `ts`.
    pub fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: &[Value],
        thread_ts: Option<&str>,
    ) -> Result<String, AdapterError> {
        let mut body = json!({"channel": channel, "text": text});
        if !blocks.is_empty() {
            body["blocks"] = Value::Array(blocks.to_vec());
        }
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = Value::String(thread_ts.to_string());
        }
        let response = self.post_json("chat.postMessage", &body)?;
        Ok(response
            .get("ts")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Upload `file` into `channel` with the external upload flow; returns the Slack file id.
    pub fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        file: &File,
    ) -> Result<String, AdapterError> {
        let content = file.content.as_deref().ok_or_else(|| {
            AdapterError::SendError(format!("{} has no content", file.display_name()))
        })?;
        let filename = file.display_name();
        let length = content.len().to_string();

        let ticket = self.get(
            "files.getUploadURLExternal",
            &[("filename", filename), ("length", length.as_str())],
        )?;
        let upload_url = ticket
            .get("upload_url")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::ParseError("missing upload_url".to_string()))?;
        let file_id = ticket
            .get("file_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::ParseError("missing file_id".to_string()))?
            .to_string();

        let response = self.client.post(upload_url).body(content.to_vec()).send()?;
        if !response.status().is_success() {
            return Err(AdapterError::SendError(format!(
                "file upload returned {}",
                response.status()
            )));
        }

        let mut complete = json!({
            "files": [{"id": file_id, "title": filename}],
            "channel_id": channel,
        });
        if let Some(thread_ts) = thread_ts {
            complete["thread_ts"] = Value::String(thread_ts.to_string());
        }
        self.post_json("files.completeUploadExternal", &complete)?;
        Ok(file_id)
    }
}

fn check_ok(method: &str, response: reqwest::blocking::Response) -> Result<Value, AdapterError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::SendError(format!(
            "{} returned {}: {}",
            method, status, body
        )));
    }
    let body: Value = response.json()?;
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(AdapterError::SendError(format!("{} failed: {}", method, error)));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> SlackClient {
        SlackClient::new("xoxb-test").with_api_base(server.url())
    }

    #[test]
    fn slack_errors_surface_even_with_http_200() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/reactions.add")
            .with_status(200)
            .with_body(r#"{"ok":false,"error":"already_reacted"}"#)
            .create();

        let err = client(&server).add_reaction("C1", "1.0", "eyes").unwrap_err();
        assert!(err.to_string().contains("already_reacted"));
    }

    #[test]
    fn user_email_reads_profile() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/users.info")
            .match_query(Matcher::UrlEncoded("user".into(), "U1".into()))
            .match_header("authorization", "Bearer xoxb-test")
            .with_status(200)
            .with_body(r#"{"ok":true,"user":{"id":"U1","profile":{"email":"dana@example.com"}}}"#)
            .create();

        let email = client(&server).user_email("U1").unwrap();
        assert_eq!(email.as_deref(), Some("dana@example.com"));
    }

    #[test]
    fn post_message_threads_reply() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_body(Matcher::PartialJson(json!({
                "channel": "C1",
                "text": "hello",
                "thread_ts": "1.5"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"ts":"2.0"}"#)
            .expect(1)
            .create();

        let ts = client(&server)
            .post_message("C1", "hello", &[], Some("1.5"))
            .unwrap();
        assert_eq!(ts, "2.0");
        mock.assert();
    }

    #[test]
    fn upload_runs_external_flow() {
        let mut server = mockito::Server::new();
        let ticket = server
            .mock("GET", "/files.getUploadURLExternal")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("filename".into(), "chart.png".into()),
                Matcher::UrlEncoded("length".into(), "3".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"ok":true,"upload_url":"{}/upload/abc","file_id":"F123"}}"#,
                server.url()
            ))
            .create();
        let upload = server
            .mock("POST", "/upload/abc")
            .match_body(vec![1u8, 2, 3])
            .with_status(200)
            .create();
        let complete = server
            .mock("POST", "/files.completeUploadExternal")
            .match_body(Matcher::PartialJson(json!({
                "files": [{"id": "F123"}],
                "channel_id": "D1"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"files":[{"id":"F123"}]}"#)
            .create();

        let file = File::local("chart.png", "png", vec![1, 2, 3]);
        let id = client(&server).upload_file("D1", None, &file).unwrap();

        assert_eq!(id, "F123");
        ticket.assert();
        upload.assert();
        complete.assert();
    }
}
