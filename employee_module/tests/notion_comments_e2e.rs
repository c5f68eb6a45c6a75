mod test_support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use employee_module::channel::SessionScope;
use employee_module::notion::{start_notion_threads, NotionClient, NotionPoller, NotionResponder};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};

use test_support::RecordingHandler;

fn client(server: &ServerGuard) -> NotionClient {
    NotionClient::new("secret_test").with_api_base(server.url())
}

fn paragraph(id: &str, text: &str) -> Value {
    json!({
        "object": "block",
        "id": id,
        "type": "paragraph",
        "paragraph": {"rich_text": [{"type": "text", "text": {"content": text}, "plain_text": text}]}
    })
}

fn mention(name: &str) -> Value {
    json!({
        "type": "mention",
        "mention": {"type": "user", "user": {"object": "user", "id": "bot", "name": name}},
        "plain_text": format!("@{}", name)
    })
}

fn text(content: &str) -> Value {
    json!({"type": "text", "text": {"content": content}, "plain_text": content})
}

/// A workspace with one page, one paragraph and two comments: a top-level one
/// that does not mention the agent and an inline one that does.
fn mock_workspace(server: &mut ServerGuard) {
    server
        .mock("POST", "/search")
        .match_body(Matcher::PartialJson(json!({"filter": {"value": "page"}})))
        .with_body(json!({"results": [{"object": "page", "id": "p1", "properties": {}}], "has_more": false}).to_string())
        .create();
    server
        .mock("GET", "/comments")
        .match_query(Matcher::UrlEncoded("block_id".into(), "p1".into()))
        .with_body(
            json!({
                "results": [{
                    "id": "c0",
                    "discussion_id": "d0",
                    "parent": {"type": "page_id", "page_id": "p1"},
                    "created_by": {"object": "user", "id": "u1"},
                    "rich_text": [text("Looks good to me")]
                }],
                "has_more": false
            })
            .to_string(),
        )
        .create();
    server
        .mock("GET", "/blocks/p1/children")
        .match_query(Matcher::Any)
        .with_body(json!({"results": [paragraph("b1", "Teh launch is in May")], "has_more": false}).to_string())
        .create();
    server
        .mock("GET", "/comments")
        .match_query(Matcher::UrlEncoded("block_id".into(), "b1".into()))
        .with_body(
            json!({
                "results": [{
                    "id": "c1",
                    "discussion_id": "d1",
                    "parent": {"type": "block_id", "block_id": "b1"},
                    "created_by": {"object": "user", "id": "u1"},
                    "rich_text": [mention("Employee"), text(" please fix the typo ")]
                }],
                "has_more": false
            })
            .to_string(),
        )
        .create();
    server
        .mock("GET", "/pages/p1")
        .with_body(
            json!({
                "id": "p1",
                "properties": {"Name": {"type": "title", "title": [{"plain_text": "Launch plan"}]}}
            })
            .to_string(),
        )
        .create();
    server
        .mock("GET", "/blocks/b1")
        .with_body(paragraph("b1", "Teh launch is in May").to_string())
        .create();
    server
        .mock("GET", "/users/u1")
        .with_body(
            json!({"object": "user", "id": "u1", "name": "Dana", "person": {"email": "dana@example.com"}})
                .to_string(),
        )
        .create();
}

fn mock_reply(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/comments")
        .match_body(Matcher::PartialJson(json!({
            "discussion_id": "d1",
            "rich_text": [{"text": {"content": "Fixed the typo."}}]
        })))
        .with_body(r#"{"object":"comment","id":"c2"}"#)
        .expect(1)
        .create()
}

#[test]
fn mentioned_comment_is_found_once_with_context() {
    let mut server = mockito::Server::new();
    mock_workspace(&mut server);

    let poller = NotionPoller::new(client(&server), "Employee");
    let pending = poller.poll_once().unwrap();
    assert_eq!(pending.len(), 1);

    let comment = &pending[0];
    assert_eq!(comment.comment_id, "c1");
    assert_eq!(comment.discussion_id, "d1");
    assert_eq!(comment.block_id.as_deref(), Some("b1"));
    assert_eq!(comment.sender_email, "dana@example.com");
    assert_eq!(comment.content, "please fix the typo");
    assert_eq!(comment.context_block, "Teh launch is in May");
    assert_eq!(
        comment.context_page,
        "Launch plan\n\nBlock ID: b1\nTeh launch is in May"
    );

    assert!(poller.poll_once().unwrap().is_empty());
}

#[test]
fn responder_replies_in_the_discussion() {
    let mut server = mockito::Server::new();
    mock_workspace(&mut server);
    let reply = mock_reply(&mut server);

    let poller = NotionPoller::new(client(&server), "Employee");
    let pending = poller.poll_once().unwrap();

    let handler = Arc::new(RecordingHandler::new("Employee").replying("Fixed the typo."));
    let responder = NotionResponder::new(client(&server), handler.clone(), SessionScope::Platform);
    assert_eq!(responder.respond(&pending[0]).unwrap(), "c2");

    reply.assert();
    let turns = handler.turns.lock().unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].0, "notion:dana@example.com");
    assert!(turns[0].1.text.contains("Block text: Teh launch is in May"));
    assert!(turns[0]
        .1
        .text
        .ends_with("Comment from dana@example.com: please fix the typo"));
}

#[test]
fn poller_threads_answer_and_stop() {
    let mut server = mockito::Server::new();
    mock_workspace(&mut server);
    let reply = mock_reply(&mut server);

    let handler = Arc::new(RecordingHandler::new("Employee").replying("Fixed the typo."));
    let stop = Arc::new(AtomicBool::new(false));
    let handles = start_notion_threads(
        NotionPoller::new(client(&server), "Employee"),
        NotionResponder::new(client(&server), handler.clone(), SessionScope::Platform),
        Duration::from_secs(60),
        stop.clone(),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while !reply.matched() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    reply.assert();

    stop.store(true, Ordering::Relaxed);
    let start = Instant::now();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(handler.turn_keys(), vec!["notion:dana@example.com".to_string()]);
}

#[test]
fn mentions_of_another_name_are_ignored() {
    let mut server = mockito::Server::new();
    mock_workspace(&mut server);

    let poller = NotionPoller::new(client(&server), "AI Analyst");
    assert!(poller.poll_once().unwrap().is_empty());
}

#[test]
fn failed_reply_is_dropped_not_retried() {
    let mut server = mockito::Server::new();
    mock_workspace(&mut server);
    let reply = server
        .mock("POST", "/comments")
        .with_status(500)
        .with_body(r#"{"object":"error","status":500,"code":"internal_server_error","message":"boom"}"#)
        .expect(1)
        .create();

    let handler = Arc::new(RecordingHandler::new("Employee").replying("Fixed the typo."));
    let stop = Arc::new(AtomicBool::new(false));
    let handles = start_notion_threads(
        NotionPoller::new(client(&server), "Employee"),
        NotionResponder::new(client(&server), handler.clone(), SessionScope::Platform),
        Duration::from_millis(100),
        stop.clone(),
    );

    // Several poll intervals pass; the comment is answered at most once.
    std::thread::sleep(Duration::from_millis(1000));
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    reply.assert();
    assert_eq!(handler.turn_keys(), vec!["notion:dana@example.com".to_string()]);
}
