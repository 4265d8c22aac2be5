use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::Event;
use crate::config::DeviceConfig;
use crate::config::DevicesConfig;
use crate::crypto;
use crate::devices::Device;
use crate::devices::DeviceRecord;
use crate::devices::DeviceSnapshot;
use crate::devices::Dispatcher;
use crate::discovery::ResolvedService;
use crate::discovery::ServiceChange;
use crate::discovery::ServiceDiscovery;
use crate::discovery::ServiceNotification;
use crate::error::BrowseError;
use crate::transport::CommandTransport;

/// mDNS service type advertised by eWeLink devices.
pub const SERVICE_TYPE: &str = "_ewelink._tcp.local.";

/// Instance-name prefix advertised by eWeLink devices.
pub const DEVICE_PREFIX: &str = "eWeLink_";

/// TXT properties whose concatenation is the device payload.
const DATA_CHUNKS: [&str; 4] = ["data1", "data2", "data3", "data4"];

/// Upper bound on a single resolve round-trip. The discovery protocol
/// specifies none; an unresolvable record must not pin a pipeline task.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight pipelines and command sends at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared between the browser and its per-notification pipeline tasks.
struct Shared {
    config: DevicesConfig,
    devices: Mutex<HashMap<String, Arc<Mutex<Device>>>>,
    dispatcher: Dispatcher,
}

/// Synchronization engine over the discovery feed.
///
/// Each notification is resolved in its own task: validated, decrypted,
/// parsed, and applied to the device registry, then published as an [`Event`]
/// on an ordered queue. Malformed or unconfigured records are logged and
/// dropped; the event consumer only ever sees fully-resolved snapshots.
pub struct Browser<D: ServiceDiscovery> {
    discovery: Arc<D>,
    shared: Arc<Shared>,
    event_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Event>>>,
    event_rx: Mutex<mpsc::UnboundedReceiver<Event>>,
    pipelines: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<D: ServiceDiscovery + 'static> Browser<D> {
    pub fn new(
        config: DevicesConfig,
        discovery: D,
        transport: Arc<dyn CommandTransport>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            discovery: Arc::new(discovery),
            shared: Arc::new(Shared {
                config,
                devices: Mutex::new(HashMap::new()),
                dispatcher: Dispatcher::new(transport),
            }),
            event_tx: std::sync::Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(event_rx),
            pipelines: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Consume the discovery subscription until it is cancelled.
    ///
    /// Each notification runs its resolution pipeline in a separate task, so
    /// a slow resolve never blocks later notifications.
    pub async fn run(&self) {
        info!("Browser starting");
        while let Some(notification) = self.discovery.next_notification().await {
            let event_tx = match self.event_tx.lock() {
                Ok(event_tx) => event_tx.clone(),
                Err(_) => None,
            };
            let Some(event_tx) = event_tx else { break };

            let discovery = Arc::clone(&self.discovery);
            let shared = Arc::clone(&self.shared);
            let handle = tokio::spawn(async move {
                process_notification(discovery, shared, event_tx, notification).await;
            });
            if let Ok(mut pipelines) = self.pipelines.lock() {
                pipelines.retain(|h| !h.is_finished());
                pipelines.push(handle);
            }
        }
        info!("Browser stopped");
    }

    /// Receive the next fully-resolved event.
    ///
    /// Returns `None` after [`shutdown`](Self::shutdown) once the queue has
    /// drained.
    pub async fn next_event(&self) -> Option<Event> {
        self.event_rx.lock().await.recv().await
    }

    /// Snapshot every known device.
    pub async fn devices(&self) -> HashMap<String, DeviceSnapshot> {
        let devices = self.shared.devices.lock().await;
        let mut snapshots = HashMap::with_capacity(devices.len());
        for (id, device) in devices.iter() {
            snapshots.insert(id.clone(), device.lock().await.snapshot());
        }
        snapshots
    }

    /// Handle to a live device, for issuing commands.
    pub async fn device(&self, device_id: &str) -> Option<Arc<Mutex<Device>>> {
        self.shared.devices.lock().await.get(device_id).cloned()
    }

    /// Cancel the discovery subscription, drain in-flight work within a
    /// bounded grace period, and close the event feed.
    pub async fn shutdown(&self) {
        debug!("Stopping...");
        self.discovery.cancel().await;

        let pipelines: Vec<_> = match self.pipelines.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let drain = async {
            for handle in pipelines {
                let _ = handle.await;
            }
            self.shared.dispatcher.drain().await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Shutdown grace period elapsed with work still in flight");
        }

        if let Ok(mut event_tx) = self.event_tx.lock() {
            event_tx.take();
        }
        debug!("Stopped");
    }
}

/// Resolve one notification and publish the outcome. Every error is handled
/// here: nothing propagates out of a pipeline task.
async fn process_notification<D: ServiceDiscovery>(
    discovery: Arc<D>,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<Event>,
    notification: ServiceNotification,
) {
    debug!(
        "Service \"{}\" change: {}",
        notification.service_name, notification.change
    );
    match resolve_notification(&*discovery, &shared, &notification).await {
        Ok(event) => {
            info!("{} {}", notification.change, event.device.identity.id);
            let _ = event_tx.send(event);
        }
        Err(e) => log_browse_error(&notification, &e),
    }
}

fn log_browse_error(notification: &ServiceNotification, error: &BrowseError) {
    match error {
        // Unknown devices are routine on a shared network.
        BrowseError::NotConfigured { .. } => debug!("{}, ignoring it", error),
        BrowseError::InvalidRecord(_)
        | BrowseError::InfoUnavailable(_)
        | BrowseError::MissingKey { .. } => warn!("{}, ignoring it", error),
        _ => error!(
            "Error processing {} for \"{}\": {}, ignoring it",
            notification.change, notification.service_name, error
        ),
    }
}

async fn resolve_notification<D: ServiceDiscovery>(
    discovery: &D,
    shared: &Shared,
    notification: &ServiceNotification,
) -> Result<Event, BrowseError> {
    let name = notification.service_name.as_str();
    if !name.starts_with(DEVICE_PREFIX) || !name.ends_with(&format!(".{}", SERVICE_TYPE)) {
        return Err(BrowseError::InvalidRecord(name.to_string()));
    }

    let info = tokio::time::timeout(
        RESOLVE_TIMEOUT,
        discovery.resolve(&notification.service_type, name),
    )
    .await
    .ok()
    .flatten()
    .ok_or_else(|| BrowseError::InfoUnavailable(name.to_string()))?;

    let (record, config) = normalize_record(name, &info, &shared.config)?;
    info!(
        "{} device id:{} type:{} name:{}",
        notification.change,
        record.id,
        record.model,
        config.name()
    );

    // Get-or-create is atomic per id: two concurrent notifications for the
    // same device cannot race to construct two instances.
    let (device, created) = {
        let mut devices = shared.devices.lock().await;
        match devices.entry(record.id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let device = Device::create(&record, config, shared.dispatcher.clone())?;
                let device = Arc::new(Mutex::new(device));
                entry.insert(Arc::clone(&device));
                (device, true)
            }
        }
    };

    if !created && notification.change != ServiceChange::Removed {
        device.lock().await.update(&record)?;
    }
    // A removal leaves the device in the registry untouched.

    let snapshot = device.lock().await.snapshot();
    Ok(Event {
        change: notification.change,
        device: snapshot,
    })
}

fn normalize_record<'a>(
    name: &str,
    info: &ResolvedService,
    config: &'a DevicesConfig,
) -> Result<(DeviceRecord, &'a DeviceConfig), BrowseError> {
    let missing = |property| BrowseError::MissingProperty {
        name: name.to_string(),
        property,
    };

    let id = info.property_str("id").ok_or_else(|| missing("id"))?.to_string();
    let model = info
        .property_str("type")
        .ok_or_else(|| missing("type"))?
        .to_string();
    let device_config = config
        .device(&id)
        .ok_or_else(|| BrowseError::NotConfigured {
            id: id.clone(),
            model: model.clone(),
        })?;
    debug!("Got config for {} ({})", id, device_config.name());

    let mut payload = Vec::new();
    for chunk in DATA_CHUNKS {
        if let Some(part) = info.properties.get(chunk) {
            payload.extend_from_slice(part);
        }
    }

    let encrypt = matches!(info.properties.get("encrypt"), Some(v) if v.as_slice() == b"true");
    let payload = if encrypt {
        let key = device_config
            .key()
            .ok_or_else(|| BrowseError::MissingKey {
                id: id.clone(),
                model: model.clone(),
            })?;
        let iv = info.property_str("iv").ok_or_else(|| missing("iv"))?;
        let ciphertext = std::str::from_utf8(&payload).map_err(|e| {
            BrowseError::MalformedPayload {
                id: id.clone(),
                source: Box::new(e),
            }
        })?;
        crypto::decrypt(ciphertext, iv, key).map_err(|e| BrowseError::MalformedPayload {
            id: id.clone(),
            source: Box::new(e),
        })?
    } else {
        payload
    };

    let data: Value =
        serde_json::from_slice(&payload).map_err(|e| BrowseError::MalformedPayload {
            id: id.clone(),
            source: Box::new(e),
        })?;

    let address = info
        .addresses
        .first()
        .copied()
        .ok_or_else(|| missing("address"))?;

    Ok((
        DeviceRecord {
            id,
            model,
            address: Ipv4Addr::from(address),
            port: info.port,
            encrypt,
            data,
        },
        device_config,
    ))
}
