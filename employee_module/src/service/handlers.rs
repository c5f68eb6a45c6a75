use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::slack::events::SlackChallengeResponse;
use crate::slack::{verify_slack_request, SlackEnvelope, SlashCommand};

use super::state::AppState;

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(super) async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(bot) = state.slack.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "slack_disabled"})),
        );
    };

    if let Err(reason) =
        verify_slack_request(state.slack_signing_secret.as_deref(), &headers, &body)
    {
        warn!("rejected slack event: {}", reason);
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("bad slack payload: {}", err);
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"})));
        }
    };

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            let response = SlackChallengeResponse { challenge };
            (StatusCode::OK, Json(json!(response)))
        }
        SlackEnvelope::EventCallback {
            event_id, event, ..
        } => {
            // The first delivery is already being answered.
            if let Some(retry) = headers.get("x-slack-retry-num") {
                info!(
                    "ignoring slack retry {:?} of event {}",
                    retry,
                    event_id.as_deref().unwrap_or("-")
                );
                return (StatusCode::OK, Json(json!({"status": "retry_ignored"})));
            }
            debug!(
                "slack event {} type={} channel={}",
                event_id.as_deref().unwrap_or("-"),
                event.kind,
                event.channel.as_deref().unwrap_or("-")
            );
            task::spawn_blocking(move || {
                if let Err(err) = bot.handle_event(&event) {
                    error!("slack event failed: {}", err);
                }
            });
            (StatusCode::OK, Json(json!({"status": "accepted"})))
        }
        SlackEnvelope::Other => (StatusCode::OK, Json(json!({"status": "ignored"}))),
    }
}

pub(super) async fn slack_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(bot) = state.slack.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "slack_disabled".to_string());
    };

    if let Err(reason) =
        verify_slack_request(state.slack_signing_secret.as_deref(), &headers, &body)
    {
        warn!("rejected slack command: {}", reason);
        return (StatusCode::UNAUTHORIZED, reason.to_string());
    }

    let command: SlashCommand = match serde_urlencoded::from_bytes(&body) {
        Ok(command) => command,
        Err(err) => {
            warn!("bad slash command payload: {}", err);
            return (StatusCode::BAD_REQUEST, "bad_form".to_string());
        }
    };

    // Slack wants an answer within 3s; a reset may wait on a running turn.
    let reply = bot.command_reply(&command);
    task::spawn_blocking(move || bot.run_command(&command));
    (StatusCode::OK, reply)
}
