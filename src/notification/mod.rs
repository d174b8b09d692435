//! Notification definitions and their rendering.
//!
//! A [`Notification`] is a definition whose string fields are templates. It is
//! compiled once with [`Notification::get_templater`] and the resulting
//! [`Templater`] renders it against each event's context.

mod templater;
mod types;

pub use templater::Templater;
pub use types::{ChatNotification, DeliveryPolicy, Destination, Notification};
