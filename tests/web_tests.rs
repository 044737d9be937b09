//! Tests for the web front end: routing, SSE relay of a full cycle, backend
//! selection and the turn limit, all over real sockets.

mod common;

use std::sync::Arc;

use common::*;
use ethics_chat::config::{Config, ERROR_MESSAGE, TERMINATION_NOTICE};
use ethics_chat::transport::Transports;
use ethics_chat::web::{self, SharedController, SseUi};
use ethics_chat::{Backend, ChatController};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

struct Harness {
    base: String,
    client: reqwest::Client,
    controller: SharedController,
}

async fn start(local_chunks: Vec<&'static str>, backend: Backend) -> Harness {
    let ollama = mock_backend("200 OK", local_chunks).await;
    let config = Config {
        local_url: format!("{}/api/chat", ollama.base_url),
        api_key: None,
        ..Config::default()
    };
    let controller: SharedController = Arc::new(Mutex::new(ChatController::new(
        SseUi::default(),
        Transports::from_config(&config),
        backend,
    )));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = controller.clone();
    tokio::spawn(async move {
        let _ = web::run(listener, server).await;
    });

    Harness { base: format!("http://{}", addr), client: reqwest::Client::new(), controller }
}

impl Harness {
    async fn state(&self) -> serde_json::Value {
        self.client
            .get(format!("{}/state", self.base))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("json")
    }

    /// Submit and return the decoded SSE events, `[DONE]` excluded.
    async fn submit(&self, message: &str) -> Vec<serde_json::Value> {
        let body = self
            .client
            .get(format!("{}/submit", self.base))
            .query(&[("message", message)])
            .send()
            .await
            .expect("send")
            .text()
            .await
            .expect("body");
        assert!(body.trim_end().ends_with("data: [DONE]"), "unterminated stream: {}", body);
        body.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .filter(|data| *data != "[DONE]")
            .map(|data| serde_json::from_str(data).expect("event json"))
            .collect()
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base, path))
            .send()
            .await
            .expect("send")
    }
}

fn ops(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["op"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_index_page_served() {
    let h = start(vec![], Backend::Local).await;
    let resp = h.client.get(format!("{}/", h.base)).send().await.expect("send");
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html")));
    assert!(resp.text().await.expect("body").contains("<!DOCTYPE html>"));
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let h = start(vec![], Backend::Local).await;
    let resp = h.client.get(format!("{}/nope", h.base)).send().await.expect("send");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_initial_state() {
    let h = start(vec![], Backend::Remote).await;
    let state = h.state().await;
    assert_eq!(state["backend"], "remote");
    assert_eq!(state["user_turns"], 0);
    assert_eq!(state["state"], "open");
    assert_eq!(state["turns"], serde_json::json!([]));
}

#[tokio::test]
async fn test_submit_streams_cycle_events() {
    let h = start(OLLAMA_HI_THERE.to_vec(), Backend::Local).await;
    let events = h.submit("hello").await;
    assert_eq!(
        ops(&events),
        vec![
            "append_turn",
            "set_input_enabled",
            "show_indicator",
            "append_turn",
            "hide_indicator",
            "append_token",
            "append_token",
            "set_input_enabled",
        ]
    );
    assert_eq!(events[0]["role"], "user");
    assert_eq!(events[0]["text"], "hello");
    assert_eq!(events[5]["id"], 1);
    assert_eq!(events[5]["token"], "Hi");
    assert_eq!(events[6]["token"], " there");
    assert_eq!(events[7]["enabled"], true);

    let state = h.state().await;
    assert_eq!(state["user_turns"], 1);
    assert_eq!(state["turns"][1]["text"], "Hi there");
    assert_eq!(state["phase"], "idle");
}

#[tokio::test]
async fn test_blank_submission_rejected_over_sse() {
    let h = start(vec![], Backend::Local).await;
    let events = h.submit("   ").await;
    assert_eq!(ops(&events), vec!["rejected"]);
    assert_eq!(events[0]["reason"], "empty");
    assert_eq!(h.state().await["user_turns"], 0);
}

#[tokio::test]
async fn test_remote_without_key_yields_error_turn() {
    let h = start(vec![], Backend::Remote).await;
    let events = h.submit("hello").await;
    let update = events
        .iter()
        .find(|e| e["op"] == "update_turn_text")
        .expect("error text pushed");
    assert_eq!(update["text"], ERROR_MESSAGE);
    assert_eq!(events.iter().filter(|e| e["op"] == "hide_indicator").count(), 1);
    assert_eq!(h.state().await["turns"][1]["text"], ERROR_MESSAGE);
}

#[tokio::test]
async fn test_turn_limit_locks_and_select_unlocks() {
    let h = start(OLLAMA_HI_THERE.to_vec(), Backend::Local).await;
    h.submit("one").await;
    h.submit("two").await;
    let third = h.submit("three").await;
    assert_eq!(ops(&third), vec!["append_turn", "append_turn", "set_input_enabled"]);
    assert_eq!(third[1]["text"], TERMINATION_NOTICE);
    assert_eq!(third[2]["enabled"], false);

    let fourth = h.submit("four").await;
    assert_eq!(ops(&fourth), vec!["rejected"]);
    assert_eq!(fourth[0]["reason"], "locked");
    assert_eq!(h.state().await["state"], "locked");

    let resp = h.post("/select?backend=inference").await;
    assert_eq!(resp.status(), 200);
    let state: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(state["backend"], "remote");
    assert_eq!(state["state"], "open");
    assert_eq!(state["user_turns"], 0);
    assert_eq!(state["turns"], serde_json::json!([]));
}

#[tokio::test]
async fn test_select_unknown_backend_is_bad_request() {
    let h = start(vec![], Backend::Local).await;
    let resp = h.post("/select?backend=gpt").await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert!(body["error"].as_str().unwrap_or_default().contains("unsupported backend"));
    assert_eq!(h.state().await["backend"], "local");
}

#[tokio::test]
async fn test_reset_clears_conversation() {
    let h = start(OLLAMA_HI_THERE.to_vec(), Backend::Local).await;
    h.submit("one").await;
    let resp = h.post("/reset").await;
    assert_eq!(resp.status(), 200);
    let state: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(state["user_turns"], 0);
    assert_eq!(state["backend"], "local");
    assert_eq!(state["turns"], serde_json::json!([]));
}

#[tokio::test]
async fn test_busy_controller_rejects_with_conflict() {
    let h = start(vec![], Backend::Local).await;
    let guard = h.controller.lock().await;
    let resp = h
        .client
        .get(format!("{}/submit?message=hi", h.base))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 409);
    assert_eq!(h.post("/reset").await.status(), 409);
    let state = h.client.get(format!("{}/state", h.base)).send().await.expect("send");
    assert_eq!(state.status(), 409);
    drop(guard);
    assert_eq!(h.post("/reset").await.status(), 200);
    assert_eq!(h.state().await["phase"], "idle");
}

#[tokio::test]
async fn test_long_message_spanning_several_reads_is_accepted() {
    let h = start(OLLAMA_HI_THERE.to_vec(), Backend::Local).await;
    // 3000 UTF-8 bytes, about 9000 once percent-encoded.
    let message = "\u{9053}".repeat(1000);
    let events = h.submit(&message).await;
    assert_eq!(events[0]["op"], "append_turn");
    assert_eq!(events[0]["text"], message.as_str());
    let state = h.state().await;
    assert_eq!(state["user_turns"], 1);
    assert_eq!(state["turns"][1]["text"], "Hi there");
}

#[tokio::test]
async fn test_oversized_request_head_is_413() {
    let h = start(vec![], Backend::Local).await;
    let padding = "a".repeat(2 * web::MAX_REQUEST_HEAD);
    let resp = h
        .client
        .get(format!("{}/submit?message=hi", h.base))
        .header("x-padding", padding)
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 413);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "message too long");
    assert_eq!(h.state().await["user_turns"], 0);
}
