//! Lookup of a previously delivered message by grouping key.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::client::{ChatClient, HistoryMessage};
use super::message::GROUPING_EVENT_TYPE;

/// Remote handle of a delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: String,
    pub ts: String,
}

/// Finds the message that carries a grouping key.
///
/// The delivery dispatcher holds no state of its own; whatever a locator
/// reports is taken as the truth for a single send.
#[async_trait]
pub trait MessageLocator: Send + Sync {
    async fn find_by_key(&self, channel: &str, grouping_key: &str) -> Result<Option<MessageHandle>>;
}

/// Searches the channel's recent history for the grouping marker.
///
/// `channel` must be a channel ID; the history method does not resolve names.
pub struct HistoryLocator {
    client: Arc<ChatClient>,
    limit: u32,
}

impl HistoryLocator {
    pub fn new(client: Arc<ChatClient>, limit: u32) -> Self {
        Self { client, limit }
    }
}

#[async_trait]
impl MessageLocator for HistoryLocator {
    async fn find_by_key(&self, channel: &str, grouping_key: &str) -> Result<Option<MessageHandle>> {
        let history = self.client.history(channel, self.limit).await?;

        let found = history
            .messages
            .iter()
            .find(|message| carries_key(message, grouping_key))
            .map(|message| MessageHandle {
                channel: channel.to_string(),
                ts: message.ts.clone(),
            });

        tracing::debug!(
            channel = %channel,
            grouping_key = %grouping_key,
            scanned = history.messages.len(),
            found = found.is_some(),
            "Searched channel history for grouping key"
        );

        Ok(found)
    }
}

fn carries_key(message: &HistoryMessage, grouping_key: &str) -> bool {
    message.metadata.as_ref().is_some_and(|metadata| {
        metadata.event_type == GROUPING_EVENT_TYPE
            && metadata.event_payload.get("grouping_key").and_then(|v| v.as_str())
                == Some(grouping_key)
    })
}
