//! Slack Events API payloads.

use std::sync::LazyLock;

use assistant_module::types::File;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LEADING_MENTIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*<@[A-Z0-9]+(\|[^>]*)?>)+\s*").unwrap());

/// Outer body of an Events API request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        #[serde(default)]
        event_id: Option<String>,
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackChallengeResponse {
    pub challenge: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
}

impl SlackFile {
    /// Remote reference; bytes are fetched later with the bot token.
    pub fn to_file(&self) -> File {
        File {
            id: Some(self.id.clone()),
            url: self.url_private.clone(),
            name: self.name.clone(),
            filetype: self.filetype.clone(),
            content: None,
        }
    }
}

/// What the bot does with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// Run a turn and reply in the conversation.
    Respond,
    /// Someone joined a channel; greet if it was the bot.
    MemberJoined,
    /// Channel chatter the bot can see but does not answer.
    Observe,
    Ignore,
}

impl SlackEvent {
    pub fn action(&self) -> EventAction {
        if self.bot_id.is_some() {
            return EventAction::Ignore;
        }
        match self.kind.as_str() {
            "app_mention" => EventAction::Respond,
            "member_joined_channel" => EventAction::MemberJoined,
            "message" if self.subtype.as_deref().is_some_and(|s| s != "file_share") => {
                EventAction::Ignore
            }
            "message" => match self.channel_type.as_deref() {
                Some("im") => EventAction::Respond,
                Some("channel") | Some("group") | Some("mpim") => EventAction::Observe,
                _ => EventAction::Ignore,
            },
            _ => EventAction::Ignore,
        }
    }

    /// Message text with leading `<@U123>` mentions removed.
    pub fn clean_text(&self) -> String {
        let text = self.text.as_deref().unwrap_or_default();
        LEADING_MENTIONS.replace(text, "").trim().to_string()
    }
}

/// Form body of a slash command request.
#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> SlackEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn envelope_variants_parse() {
        let challenge: SlackEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc","token":"t"}"#)
                .unwrap();
        assert!(matches!(challenge, SlackEnvelope::UrlVerification { challenge } if challenge == "abc"));

        let callback: SlackEnvelope = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event_id":"Ev1","event":{"type":"app_mention","user":"U1","text":"<@UBOT> hi","channel":"C1","ts":"1.2"}}"#,
        )
        .unwrap();
        let SlackEnvelope::EventCallback { event, .. } = callback else {
            panic!("expected callback");
        };
        assert_eq!(event.action(), EventAction::Respond);
        assert_eq!(event.clean_text(), "hi");

        let both: SlackEvent = serde_json::from_str(
            r#"{"type":"app_mention","text":"<@UBOT|employee> <@U2> summarise <@U3>'s notes"}"#,
        )
        .unwrap();
        assert_eq!(both.clean_text(), "summarise <@U3>'s notes");
    }

    #[test]
    fn direct_messages_are_answered_and_channel_messages_observed() {
        let dm = event(r#"{"type":"message","user":"U1","text":"hello","channel":"D1","channel_type":"im","ts":"1.0"}"#);
        assert_eq!(dm.action(), EventAction::Respond);
        let chatter = event(r#"{"type":"message","user":"U1","text":"hello","channel":"C1","channel_type":"channel","ts":"1.0"}"#);
        assert_eq!(chatter.action(), EventAction::Observe);
    }

    #[test]
    fn bot_and_edited_messages_are_ignored() {
        let bot = event(r#"{"type":"message","bot_id":"B1","text":"hi","channel_type":"im"}"#);
        assert_eq!(bot.action(), EventAction::Ignore);
        let edit = event(r#"{"type":"message","subtype":"message_changed","channel_type":"im"}"#);
        assert_eq!(edit.action(), EventAction::Ignore);
        let upload = event(r#"{"type":"message","subtype":"file_share","user":"U1","channel_type":"im"}"#);
        assert_eq!(upload.action(), EventAction::Respond);
    }

    #[test]
    fn files_become_remote_references() {
        let dm = event(
            r#"{"type":"message","channel_type":"im","files":[{"id":"F1","name":"q3.csv","filetype":"csv","url_private":"https://files.slack.com/q3.csv"}]}"#,
        );
        let file = dm.files[0].to_file();
        assert_eq!(file.state(), assistant_module::types::FileState::Remote);
        assert_eq!(file.name.as_deref(), Some("q3.csv"));
    }
}
