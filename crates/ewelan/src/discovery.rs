//! Service-discovery boundary.
//!
//! The mDNS browse/resolve machinery is an external collaborator: the engine
//! only consumes change notifications and on-demand record resolution
//! through the [`ServiceDiscovery`] trait. Tests substitute a mock, the same
//! way the HTTP transport is mocked.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

/// The kind of change reported by the discovery subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum ServiceChange {
    Added,
    Updated,
    Removed,
}

/// One notification from the discovery subscription.
#[derive(Debug, Clone)]
pub struct ServiceNotification {
    pub service_type: String,
    pub service_name: String,
    pub change: ServiceChange,
}

/// Resolved metadata for a service: opaque TXT properties, raw IPv4
/// addresses, and the command port.
#[derive(Debug, Clone, Default)]
pub struct ResolvedService {
    pub properties: HashMap<String, Vec<u8>>,
    pub addresses: Vec<[u8; 4]>,
    pub port: u16,
}

impl ResolvedService {
    /// Look up a TXT property as UTF-8.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(|value| std::str::from_utf8(value).ok())
    }
}

/// Interface to the platform discovery library.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Wait for the next change notification.
    ///
    /// Returns `None` once the subscription has been cancelled and every
    /// pending notification has been delivered.
    async fn next_notification(&self) -> Option<ServiceNotification>;

    /// Resolve the full service record, or `None` if the service is gone.
    async fn resolve(&self, service_type: &str, service_name: &str) -> Option<ResolvedService>;

    /// Cancel the subscription.
    async fn cancel(&self);
}

/// Mock discovery source for tests: notifications are scripted with
/// [`push`](MockDiscovery::push) and resolution reads from a fixed record
/// table, optionally after a per-name delay to exercise out-of-order
/// completion.
#[cfg(test)]
pub(crate) struct MockDiscovery {
    notification_tx:
        std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedSender<ServiceNotification>>>,
    notification_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<ServiceNotification>>,
    records: std::sync::Mutex<HashMap<String, ResolvedService>>,
    resolve_delays: std::sync::Mutex<HashMap<String, std::time::Duration>>,
    cancelled: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockDiscovery {
    pub fn new() -> Self {
        let (notification_tx, notification_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            notification_tx: std::sync::Mutex::new(Some(notification_tx)),
            notification_rx: tokio::sync::Mutex::new(notification_rx),
            records: std::sync::Mutex::new(HashMap::new()),
            resolve_delays: std::sync::Mutex::new(HashMap::new()),
            cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Queue a notification for the subscriber.
    pub fn push(&self, notification: ServiceNotification) {
        if let Some(tx) = self.notification_tx.lock().unwrap().as_ref() {
            let _ = tx.send(notification);
        }
    }

    /// Script the record returned when `service_name` is resolved.
    pub fn set_record(&self, service_name: &str, record: ResolvedService) {
        self.records
            .lock()
            .unwrap()
            .insert(service_name.to_string(), record);
    }

    /// Delay resolution of `service_name` to simulate a slow round-trip.
    pub fn set_resolve_delay(&self, service_name: &str, delay: std::time::Duration) {
        self.resolve_delays
            .lock()
            .unwrap()
            .insert(service_name.to_string(), delay);
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl ServiceDiscovery for MockDiscovery {
    async fn next_notification(&self) -> Option<ServiceNotification> {
        self.notification_rx.lock().await.recv().await
    }

    async fn resolve(&self, _service_type: &str, service_name: &str) -> Option<ResolvedService> {
        let delay = self
            .resolve_delays
            .lock()
            .unwrap()
            .get(service_name)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.records.lock().unwrap().get(service_name).cloned()
    }

    async fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        // Dropping the sender ends the subscription once pending
        // notifications have been drained.
        self.notification_tx.lock().unwrap().take();
    }
}
