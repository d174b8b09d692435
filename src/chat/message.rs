//! Resolution of a rendered notification into a chat API request.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ChatOptions;
use crate::error::{NotifyError, Result};
use crate::notification::{DeliveryPolicy, Notification};

/// Event type of the metadata marker that carries a grouping key
pub const GROUPING_EVENT_TYPE: &str = "alert_relay_group";

static VALID_ICON_EMOJI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:[\w+\-]+:$").expect("icon emoji pattern is valid"));

/// A validated message icon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Icon {
    Emoji(String),
    Url(String),
}

impl Icon {
    /// Classify an icon reference, rejecting anything that is neither an
    /// emoji reference nor an absolute http(s) URL.
    pub fn parse(value: &str) -> Result<Self> {
        if is_valid_icon_emoji(value) {
            Ok(Icon::Emoji(value.to_string()))
        } else if is_valid_icon_url(value) {
            Ok(Icon::Url(value.to_string()))
        } else {
            Err(NotifyError::InvalidIcon(value.to_string()))
        }
    }
}

pub fn is_valid_icon_emoji(value: &str) -> bool {
    VALID_ICON_EMOJI.is_match(value)
}

pub fn is_valid_icon_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

/// Legacy message attachment.
///
/// Unknown keys are dropped on decode; `blocks` is always encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub callback_id: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_subname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author_icon: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pretext: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thumb_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_icon: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub original_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mrkdwn_in: Vec<String>,
    pub blocks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub footer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub footer_icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// One resolved piece of a chat message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOption {
    Text(String),
    Username(String),
    Icon(Icon),
    Attachments(Vec<Attachment>),
    Blocks(Vec<Value>),
    DisableUnfurl,
}

/// Delivery-related fields resolved from a notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySettings {
    pub grouping_key: String,
    pub notify_broadcast: bool,
    pub delivery_policy: DeliveryPolicy,
}

/// Resolve a rendered notification against the backend's static options.
///
/// Extension values override static defaults. The returned options always
/// start with the message text.
pub fn build_message_options(
    notification: &Notification,
    options: &ChatOptions,
) -> Result<(DeliverySettings, Vec<MessageOption>)> {
    let mut msg_options = vec![MessageOption::Text(notification.message.clone())];

    if !options.username.is_empty() {
        msg_options.push(MessageOption::Username(options.username.clone()));
    }
    if !options.icon.is_empty() {
        msg_options.push(MessageOption::Icon(Icon::parse(&options.icon)?));
    }
    if options.disable_unfurl {
        msg_options.push(MessageOption::DisableUnfurl);
    }

    let mut settings = DeliverySettings {
        grouping_key: notification.grouping_key.clone(),
        ..Default::default()
    };

    if let Some(chat) = &notification.chat {
        let attachments = decode_array::<Attachment>("attachments", &chat.attachments)?;
        let blocks = decode_array::<Value>("blocks", &chat.blocks)?;
        msg_options.push(MessageOption::Attachments(attachments));
        msg_options.push(MessageOption::Blocks(blocks));

        if !chat.username.is_empty() {
            msg_options.push(MessageOption::Username(chat.username.clone()));
        }
        if !chat.icon.is_empty() {
            msg_options.push(MessageOption::Icon(Icon::parse(&chat.icon)?));
        }

        if !chat.grouping_key.is_empty() {
            settings.grouping_key = chat.grouping_key.clone();
        }
        settings.notify_broadcast = chat.notify_broadcast;
        settings.delivery_policy = chat.delivery_policy;
    }

    if settings.grouping_key.is_empty() {
        settings.delivery_policy = DeliveryPolicy::Post;
    }

    Ok((settings, msg_options))
}

fn decode_array<T: serde::de::DeserializeOwned>(field: &'static str, raw: &str) -> Result<Vec<T>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| NotifyError::MalformedPayload {
        field,
        reason: format!("'{raw}': {e}"),
    })
}

/// Fully resolved payload for one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRequest {
    pub channel: String,
    pub text: String,
    pub username: Option<String>,
    pub icon: Option<Icon>,
    /// Present whenever the notification had a chat extension
    pub attachments: Option<Vec<Attachment>>,
    pub blocks: Vec<Value>,
    pub disable_unfurl: bool,
    pub grouping_key: String,
    pub broadcast: bool,
    pub delivery_policy: DeliveryPolicy,
}

impl MessageRequest {
    /// Apply message options, in order, to a request for `channel`
    pub fn new(channel: &str, settings: DeliverySettings, options: Vec<MessageOption>) -> Self {
        let mut request = Self {
            channel: channel.to_string(),
            grouping_key: settings.grouping_key,
            broadcast: settings.notify_broadcast,
            delivery_policy: settings.delivery_policy,
            ..Default::default()
        };
        for option in options {
            match option {
                MessageOption::Text(text) => request.text = text,
                MessageOption::Username(username) => request.username = Some(username),
                MessageOption::Icon(icon) => request.icon = Some(icon),
                MessageOption::Attachments(attachments) => request.attachments = Some(attachments),
                MessageOption::Blocks(blocks) => request.blocks = blocks,
                MessageOption::DisableUnfurl => request.disable_unfurl = true,
            }
        }
        request
    }

    /// The policy actually applied: anything but `Post` needs a grouping key.
    pub fn effective_policy(&self) -> DeliveryPolicy {
        if self.grouping_key.is_empty() {
            DeliveryPolicy::Post
        } else {
            self.delivery_policy
        }
    }

    /// Form fields shared by every chat API method, sorted by key
    pub fn form(&self) -> Result<BTreeMap<&'static str, String>> {
        let mut form = BTreeMap::new();
        form.insert("channel", self.channel.clone());
        form.insert("text", self.text.clone());

        if let Some(username) = &self.username {
            form.insert("username", username.clone());
        }
        match &self.icon {
            Some(Icon::Emoji(emoji)) => {
                form.insert("icon_emoji", emoji.clone());
            }
            Some(Icon::Url(url)) => {
                form.insert("icon_url", url.clone());
            }
            None => {}
        }
        if let Some(attachments) = &self.attachments {
            form.insert("attachments", encode("attachments", attachments)?);
        }
        if !self.blocks.is_empty() {
            form.insert("blocks", encode("blocks", &self.blocks)?);
        }
        if self.disable_unfurl {
            form.insert("unfurl_links", "false".to_string());
            form.insert("unfurl_media", "false".to_string());
        }
        if !self.grouping_key.is_empty() {
            let metadata = serde_json::json!({
                "event_type": GROUPING_EVENT_TYPE,
                "event_payload": { "grouping_key": self.grouping_key },
            });
            form.insert("metadata", metadata.to_string());
        }

        Ok(form)
    }
}

fn encode<T: Serialize>(field: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| NotifyError::MalformedPayload {
        field,
        reason: e.to_string(),
    })
}
