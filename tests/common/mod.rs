#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;

use alert_relay::config::ChatOptions;

pub const TOKEN: &str = "something-token";

/// One request received by the mock chat API
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub body: String,
}

impl Recorded {
    /// Decoded form fields
    pub fn form(&self) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }
}

#[derive(Default)]
struct MockState {
    requests: Vec<Recorded>,
    responses: HashMap<String, (StatusCode, String)>,
}

/// In-process stand-in for the chat web API.
///
/// Every method answers `ok: true` unless overridden with [`MockChat::respond`].
#[derive(Clone, Default)]
pub struct MockChat {
    state: Arc<Mutex<MockState>>,
    pub base_url: String,
}

impl MockChat {
    pub async fn start() -> Self {
        let mut mock = MockChat::default();

        let app = Router::new()
            .route("/api/{method}", post(handle))
            .with_state(mock.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        mock.base_url = format!("http://{addr}/api/");
        mock
    }

    /// Override the response of one API method
    pub fn respond(&self, method: &str, status: StatusCode, body: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(method.to_string(), (status, body.to_string()));
    }

    /// Answer `conversations.history` with messages carrying these grouping keys,
    /// newest first
    pub fn history_with_keys(&self, messages: &[(&str, &str)]) {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|(ts, key)| {
                serde_json::json!({
                    "type": "message",
                    "ts": ts,
                    "text": "earlier",
                    "metadata": {
                        "event_type": "alert_relay_group",
                        "event_payload": { "grouping_key": key }
                    }
                })
            })
            .collect();
        let body = serde_json::json!({ "ok": true, "messages": messages });
        self.respond("conversations.history", StatusCode::OK, &body.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    /// Chat options pointing at this mock
    pub fn options(&self) -> ChatOptions {
        ChatOptions {
            api_url: self.base_url.clone(),
            token: TOKEN.to_string(),
            ..Default::default()
        }
    }
}

async fn handle(
    State(mock): State<MockChat>,
    Path(method): Path<String>,
    body: String,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let mut state = mock.state.lock().unwrap();
    state.requests.push(Recorded {
        method: method.clone(),
        body,
    });

    let (status, body) = state
        .responses
        .get(&method)
        .cloned()
        .unwrap_or_else(|| (StatusCode::OK, default_response(&method)));

    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

fn default_response(method: &str) -> String {
    match method {
        "conversations.history" => r#"{"ok":true,"messages":[]}"#.to_string(),
        "chat.update" => r#"{"ok":true,"channel":"C0123","ts":"1700000000.000100","text":""}"#.to_string(),
        _ => r#"{"ok":true,"channel":"C0123","ts":"1700000999.000200"}"#.to_string(),
    }
}

/// URL-encode pairs the way the client does; pass keys in sorted order
pub fn form_body(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
