use serde::Serialize;

use crate::devices::DeviceSnapshot;
use crate::discovery::ServiceChange;

/// A fully-resolved change to the device registry.
///
/// The snapshot is taken at publish time: later updates to the live device
/// never alter an event already on the queue. Events appear on the queue in
/// resolution-completion order.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub change: ServiceChange,
    pub device: DeviceSnapshot,
}
