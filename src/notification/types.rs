use std::fmt;

use serde::{Deserialize, Serialize};

/// A renderable alert payload.
///
/// Every string field may hold a template; see
/// [`Notification::get_templater`](super::Notification::get_templater).
///
/// Keys are camelCase; the all-lowercase spellings produced by
/// case-folding configuration sources are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Message body, always used as the chat message text
    #[serde(default)]
    pub message: String,

    /// Identifies repeated firings of the same logical alert (optional)
    #[serde(default, skip_serializing_if = "String::is_empty", alias = "groupingkey")]
    pub grouping_key: String,

    /// Chat backend extension (optional)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "slack")]
    pub chat: Option<ChatNotification>,
}

impl Notification {
    /// Create a notification carrying only a message body
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a grouping key
    pub fn with_grouping_key(mut self, key: impl Into<String>) -> Self {
        self.grouping_key = key.into();
        self
    }

    /// Attach a chat extension
    pub fn with_chat(mut self, chat: ChatNotification) -> Self {
        self.chat = Some(chat);
        self
    }
}

/// Chat-backend specific fields of a notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatNotification {
    /// Display name override
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Emoji reference (`:name:`) or http(s) image URL
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,

    /// JSON-encoded array of attachments
    #[serde(skip_serializing_if = "String::is_empty")]
    pub attachments: String,

    /// JSON-encoded array of layout blocks
    #[serde(skip_serializing_if = "String::is_empty")]
    pub blocks: String,

    /// Takes precedence over the notification-level grouping key
    #[serde(skip_serializing_if = "String::is_empty", alias = "groupingkey")]
    pub grouping_key: String,

    /// Also post thread replies to the channel
    #[serde(alias = "notifybroadcast")]
    pub notify_broadcast: bool,

    #[serde(alias = "deliverypolicy")]
    pub delivery_policy: DeliveryPolicy,
}

/// How a rendered notification is applied to the channel's message history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeliveryPolicy {
    /// Always create a new message (default)
    #[default]
    Post,
    /// Edit the message carrying the same grouping key in place
    Update,
    /// Reply in the thread of the message carrying the same grouping key
    Append,
}

impl DeliveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPolicy::Post => "Post",
            DeliveryPolicy::Update => "Update",
            DeliveryPolicy::Append => "Append",
        }
    }
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a notification is delivered
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Backend name, used for routing
    pub service: String,
    /// Channel or user identifier understood by the backend
    pub recipient: String,
}

impl Destination {
    pub fn new(service: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            recipient: recipient.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_deserialize() {
        let notification: Notification = serde_json::from_value(json!({
            "message": "App {{.app}} is out of sync",
            "groupingKey": "{{.app}}",
            "slack": {
                "icon": ":warning:",
                "notifyBroadcast": true,
                "deliveryPolicy": "Update"
            }
        }))
        .unwrap();

        assert_eq!(notification.grouping_key, "{{.app}}");
        let chat = notification.chat.unwrap();
        assert_eq!(chat.icon, ":warning:");
        assert!(chat.notify_broadcast);
        assert_eq!(chat.delivery_policy, DeliveryPolicy::Update);
        assert!(chat.attachments.is_empty());
    }

    #[test]
    fn test_notification_serialize_skips_empty() {
        let value = serde_json::to_value(Notification::new("hi")).unwrap();
        assert_eq!(value, json!({"message": "hi"}));
    }

    #[test]
    fn test_delivery_policy_default_is_post() {
        assert_eq!(DeliveryPolicy::default(), DeliveryPolicy::Post);
        assert_eq!(ChatNotification::default().delivery_policy, DeliveryPolicy::Post);
    }

    #[test]
    fn test_destination_display() {
        let destination = Destination::new("slack", "alerts");
        assert_eq!(destination.to_string(), "slack:alerts");
    }
}
