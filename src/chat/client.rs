//! Thin HTTP client for the chat web API.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ChatOptions;
use crate::error::{NotifyError, Result};

/// Maximum number of response body bytes quoted in an error
const MAX_ERROR_BODY: usize = 512;

/// Acknowledgment returned when a message is posted or updated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatResponse {
    pub channel: String,
    /// Timestamp identifying the message
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// Timestamp of an ephemeral message
    #[serde(rename = "message_ts", skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<String>,
    pub text: String,
}

/// Page of a channel's recent history
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryMessage {
    pub ts: String,
    pub text: String,
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    pub event_type: String,
    pub event_payload: Value,
}

/// Logical status shared by every API response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiStatus {
    ok: Option<bool>,
    error: Option<String>,
}

pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatClient {
    pub fn new(options: &ChatOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url(),
            token: options.token.clone(),
        })
    }

    /// `chat.postMessage`
    pub async fn post_message(&self, form: &BTreeMap<&'static str, String>) -> Result<ChatResponse> {
        self.call("chat.postMessage", form).await
    }

    /// `chat.update`
    pub async fn update_message(&self, form: &BTreeMap<&'static str, String>) -> Result<ChatResponse> {
        self.call("chat.update", form).await
    }

    /// `conversations.history`, newest first, including message metadata
    pub async fn history(&self, channel: &str, limit: u32) -> Result<HistoryResponse> {
        let mut form = BTreeMap::new();
        form.insert("channel", channel.to_string());
        form.insert("include_all_metadata", "true".to_string());
        form.insert("limit", limit.to_string());
        self.call("conversations.history", &form).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        form: &BTreeMap<&'static str, String>,
    ) -> Result<T> {
        let mut form = form.clone();
        form.insert("token", self.token.clone());

        let url = format!("{}{}", self.base_url, method);
        let response = self.http.post(&url).form(&form).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(method = %method, status = %status, "Chat API returned non-success status");
            return Err(NotifyError::Delivery(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, MAX_ERROR_BODY)
            )));
        }

        let api_status: ApiStatus = serde_json::from_str(&body).map_err(|e| {
            NotifyError::Delivery(format!("{method}: invalid response body: {e}"))
        })?;
        if let Some(error) = api_status.error.filter(|e| !e.trim().is_empty()) {
            if api_status.ok != Some(true) {
                return Err(NotifyError::Delivery(error));
            }
        }

        serde_json::from_str(&body)
            .map_err(|e| NotifyError::Delivery(format!("{method}: invalid response body: {e}")))
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
