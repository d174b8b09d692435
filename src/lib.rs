//! Templated alert rendering and update-in-place delivery to chat backends.
//!
//! Notification definitions are compiled once ([`template::TemplateService`]),
//! rendered per event, and handed to a [`service::NotificationService`] such as
//! [`chat::ChatService`], which posts, updates or threads messages by grouping
//! key.

pub mod chat;
pub mod config;
pub mod error;
pub mod notification;
pub mod service;
pub mod telemetry;
pub mod template;
