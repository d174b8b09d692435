//! Applies a message request to the channel according to its delivery policy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::notification::DeliveryPolicy;

use super::client::{ChatClient, ChatResponse};
use super::locator::{MessageHandle, MessageLocator};
use super::message::MessageRequest;

/// Form fields that `chat.update` does not accept
const NON_UPDATABLE_FIELDS: [&str; 5] = [
    "icon_emoji",
    "icon_url",
    "unfurl_links",
    "unfurl_media",
    "username",
];

/// What a dispatch did on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryAction {
    /// A new message was created
    Posted,
    /// An existing message was edited in place
    Updated,
    /// A reply was added to an existing message's thread
    Appended,
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub action: DeliveryAction,
    pub response: ChatResponse,
}

/// Counters for the delivery dispatcher
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Total dispatch attempts
    pub total_sent: AtomicU64,
    pub posted: AtomicU64,
    pub updated: AtomicU64,
    pub appended: AtomicU64,
    /// Update/Append requests that found no prior message and posted instead
    pub fallbacks: AtomicU64,
    pub failed: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            posted: self.posted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub total_sent: u64,
    pub posted: u64,
    pub updated: u64,
    pub appended: u64,
    pub fallbacks: u64,
    pub failed: u64,
}

/// Executes the post / update / append decision for one request at a time.
///
/// Holds no per-key state: every call asks the locator afresh, so two
/// concurrent sends with the same key may both post.
pub struct DeliveryDispatcher {
    client: Arc<ChatClient>,
    locator: Arc<dyn MessageLocator>,
    stats: DeliveryStats,
}

impl DeliveryDispatcher {
    pub fn new(client: Arc<ChatClient>, locator: Arc<dyn MessageLocator>) -> Self {
        Self {
            client,
            locator,
            stats: DeliveryStats::default(),
        }
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver `request`, choosing between a new message and an existing one.
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, request),
        fields(
            channel = %request.channel,
            policy = %request.effective_policy(),
            grouping_key = %request.grouping_key
        )
    )]
    pub async fn dispatch(&self, request: &MessageRequest) -> Result<DeliveryReceipt> {
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);

        let result = self.execute(request).await;
        match &result {
            Ok(receipt) => {
                let counter = match receipt.action {
                    DeliveryAction::Posted => &self.stats.posted,
                    DeliveryAction::Updated => &self.stats.updated,
                    DeliveryAction::Appended => &self.stats.appended,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    action = ?receipt.action,
                    ts = %receipt.response.timestamp,
                    "Message delivered"
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Message delivery failed");
            }
        }
        result
    }

    async fn execute(&self, request: &MessageRequest) -> Result<DeliveryReceipt> {
        let form = request.form()?;
        let policy = request.effective_policy();

        if policy == DeliveryPolicy::Post {
            return self.post(form).await;
        }

        let found = self
            .locator
            .find_by_key(&request.channel, &request.grouping_key)
            .await?;

        let Some(handle) = found else {
            self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("No message carries the grouping key yet, posting a new one");
            return self.post(form).await;
        };

        if policy == DeliveryPolicy::Update {
            let response = self.client.update_message(&update_form(form, &handle)).await?;
            Ok(DeliveryReceipt {
                action: DeliveryAction::Updated,
                response,
            })
        } else {
            let form = reply_form(form, &handle, request.broadcast);
            let response = self.client.post_message(&form).await?;
            Ok(DeliveryReceipt {
                action: DeliveryAction::Appended,
                response,
            })
        }
    }

    async fn post(&self, form: BTreeMap<&'static str, String>) -> Result<DeliveryReceipt> {
        let response = self.client.post_message(&form).await?;
        Ok(DeliveryReceipt {
            action: DeliveryAction::Posted,
            response,
        })
    }
}

/// Form for editing `handle` in place
fn update_form(
    mut form: BTreeMap<&'static str, String>,
    handle: &MessageHandle,
) -> BTreeMap<&'static str, String> {
    for field in NON_UPDATABLE_FIELDS {
        form.remove(field);
    }
    form.insert("channel", handle.channel.clone());
    form.insert("ts", handle.ts.clone());
    form
}

/// Form for replying in the thread of `handle`.
///
/// Replies do not carry the grouping marker; only the thread root does.
fn reply_form(
    mut form: BTreeMap<&'static str, String>,
    handle: &MessageHandle,
    broadcast: bool,
) -> BTreeMap<&'static str, String> {
    form.remove("metadata");
    form.insert("channel", handle.channel.clone());
    form.insert("thread_ts", handle.ts.clone());
    if broadcast {
        form.insert("reply_broadcast", "true".to_string());
    }
    form
}
