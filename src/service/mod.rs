//! Notification service abstraction and the registry that routes
//! destinations to services.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::{NotifyError, Result};
use crate::notification::{Destination, Notification};

/// A backend that can deliver a rendered notification to a recipient.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Deliver `notification` to `destination.recipient`
    async fn send(&self, notification: Notification, destination: Destination) -> Result<()>;

    /// Name that destinations use to address this service
    fn service_name(&self) -> &str;
}

/// Registry of notification services, keyed by service name.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn NotificationService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its own name, replacing any previous one
    pub fn register(&mut self, service: Arc<dyn NotificationService>) {
        let name = service.service_name().to_string();
        tracing::info!(service = %name, "Registered notification service");
        self.services.insert(name, service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationService>> {
        self.services.get(name).cloned()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Route one notification to the service named by the destination
    pub async fn send(&self, notification: Notification, destination: Destination) -> Result<()> {
        let service = self
            .get(&destination.service)
            .ok_or_else(|| NotifyError::UnknownService(destination.service.clone()))?;
        service.send(notification, destination).await
    }

    /// Send the same notification to every destination concurrently.
    ///
    /// Results are returned in the order of `destinations`.
    pub async fn send_all(
        &self,
        notification: &Notification,
        destinations: &[Destination],
    ) -> Vec<Result<()>> {
        let mut pending: FuturesUnordered<_> = destinations
            .iter()
            .enumerate()
            .map(|(i, destination)| {
                let notification = notification.clone();
                let destination = destination.clone();
                async move { (i, self.send(notification, destination).await) }
            })
            .collect();

        let mut results: Vec<Option<Result<()>>> = destinations.iter().map(|_| None).collect();
        while let Some((i, result)) = pending.next().await {
            if let Err(e) = &result {
                tracing::warn!(destination = %destinations[i], error = %e, "Notification not delivered");
            }
            results[i] = Some(result);
        }

        results.into_iter().flatten().collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
