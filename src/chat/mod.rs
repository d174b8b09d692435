//! Delivery of rendered notifications to a Slack-compatible chat API.
//!
//! A send resolves the notification into a [`MessageRequest`] and then
//! applies its delivery policy:
//! - `Post` always creates a new message
//! - `Update` edits the message carrying the same grouping key, or posts
//! - `Append` replies in that message's thread, or posts
//!
//! The message carrying a grouping key is found through a
//! [`MessageLocator`]; by default the channel's recent history is scanned for
//! the metadata marker every posted message carries.

mod client;
mod dispatcher;
mod locator;
mod message;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ChatOptions;
use crate::error::Result;
use crate::notification::{Destination, Notification};
use crate::service::NotificationService;

pub use client::{ChatClient, ChatResponse, HistoryMessage, HistoryResponse, MessageMetadata};
pub use dispatcher::{
    DeliveryAction, DeliveryDispatcher, DeliveryReceipt, DeliveryStats, DeliveryStatsSnapshot,
};
pub use locator::{HistoryLocator, MessageHandle, MessageLocator};
pub use message::{
    build_message_options, is_valid_icon_emoji, is_valid_icon_url, Attachment, AttachmentField,
    DeliverySettings, Icon, MessageOption, MessageRequest, GROUPING_EVENT_TYPE,
};

/// Default name under which a chat service is addressed by destinations
pub const DEFAULT_SERVICE_NAME: &str = "slack";

/// Notification service backed by a chat web API
///
/// Recipients of notifications with an Update or Append policy must be channel
/// IDs (`C0123456789`), not names: `conversations.history` and `chat.update`
/// reject `#name` style channels, so the lookup fails and the send returns
/// the API's `channel_not_found` error.
pub struct ChatService {
    name: String,
    options: ChatOptions,
    dispatcher: DeliveryDispatcher,
}

impl ChatService {
    /// Build a service that locates grouped messages through channel history
    pub fn new(options: ChatOptions) -> Result<Self> {
        let client = Arc::new(ChatClient::new(&options)?);
        let locator = Arc::new(HistoryLocator::new(client.clone(), options.history_limit));
        Ok(Self::from_parts(options, client, locator))
    }

    /// Build a service with a custom message locator
    pub fn with_locator(options: ChatOptions, locator: Arc<dyn MessageLocator>) -> Result<Self> {
        let client = Arc::new(ChatClient::new(&options)?);
        Ok(Self::from_parts(options, client, locator))
    }

    fn from_parts(
        options: ChatOptions,
        client: Arc<ChatClient>,
        locator: Arc<dyn MessageLocator>,
    ) -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            options,
            dispatcher: DeliveryDispatcher::new(client, locator),
        }
    }

    /// Address this service under another name, e.g. one per workspace
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.dispatcher.stats()
    }

    /// Resolve and deliver one notification, reporting what was done remotely
    #[tracing::instrument(
        name = "chat.deliver",
        skip(self, notification),
        fields(service = %self.name, recipient = %destination.recipient)
    )]
    pub async fn deliver(
        &self,
        notification: &Notification,
        destination: &Destination,
    ) -> Result<DeliveryReceipt> {
        let (settings, options) = build_message_options(notification, &self.options)?;
        let request = MessageRequest::new(&destination.recipient, settings, options);
        self.dispatcher.dispatch(&request).await
    }
}

#[async_trait]
impl NotificationService for ChatService {
    async fn send(&self, notification: Notification, destination: Destination) -> Result<()> {
        let receipt = self.deliver(&notification, &destination).await?;
        tracing::info!(
            destination = %destination,
            action = ?receipt.action,
            ts = %receipt.response.timestamp,
            "Notification sent"
        );
        Ok(())
    }

    fn service_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}
